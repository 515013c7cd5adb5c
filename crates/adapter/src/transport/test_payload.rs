use std::io::SeekFrom;

use bytes::{Bytes, BytesMut};
use http::{Request, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite};
use tracing::trace;

use crate::codec::apply_framing;
use crate::ensure;
use crate::protocol::{
    BodyChunk, ChunkError, FileRegion, Headers, Multipart, ParseError, PartHeaders, PayloadSize, RequestHeader, SegmentDecision,
    SendError,
};
use crate::transport::multipart::MultipartParser;
use crate::transport::{ResponseState, Transport, check_body_allowed};

/// An in-memory exchange for exercising application code without a socket.
///
/// The request body is served from memory and everything the application
/// sends is recorded: status, headers (with the framing header the production
/// transport would add), the full body and every chunk.
///
/// ```
/// # tokio_test_block_on(async {
/// use bytes::Bytes;
/// use http::{Request, StatusCode};
/// use micro_adapter::protocol::Headers;
/// use micro_adapter::transport::{TestPayload, Transport};
///
/// let payload = TestPayload::new(Request::get("/").body(Bytes::new()).unwrap());
/// let (payload, sent) = payload.send_response(StatusCode::OK, Headers::new(), Bytes::from_static(b"hi")).await.unwrap();
///
/// assert_eq!(sent, "hi");
/// assert_eq!(payload.status(), Some(StatusCode::OK));
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug)]
pub struct TestPayload {
    header: RequestHeader,
    body: Bytes,
    response: ResponseState,
    status: Option<StatusCode>,
    headers: Headers,
    sent_body: BytesMut,
    chunks: Vec<Bytes>,
}

impl TestPayload {
    pub fn new(request: Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            header: RequestHeader::from(parts),
            body,
            response: ResponseState::Pending,
            status: None,
            headers: Headers::new(),
            sent_body: BytesMut::new(),
            chunks: Vec::new(),
        }
    }

    /// Status of the response, once its head was sent.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Headers of the response as they would be transmitted.
    pub fn response_headers(&self) -> &Headers {
        &self.headers
    }

    /// Every body byte that would be transmitted, chunks concatenated.
    pub fn sent_body(&self) -> &[u8] {
        &self.sent_body
    }

    /// The chunks of a chunked response, one entry per transmitted chunk.
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// True once the response is complete.
    pub fn is_sent(&self) -> bool {
        self.response == ResponseState::Sent
    }

    /// True while a chunked response is open.
    pub fn is_chunked(&self) -> bool {
        self.response == ResponseState::Chunked
    }

    fn read_body(&mut self, limit: usize) -> Result<BodyChunk, ParseError> {
        ensure!(limit > 0, ParseError::invalid_body("read limit must be positive"));

        if self.body.is_empty() {
            return Ok(BodyChunk::Done);
        }

        let len = limit.min(self.body.len());
        Ok(BodyChunk::Data(self.body.split_to(len)))
    }

    fn record_head(&mut self, status: StatusCode, mut headers: Headers, payload_size: PayloadSize) {
        apply_framing(&mut headers, status, payload_size);
        self.status = Some(status);
        self.headers = headers;
    }

    /// Records `body` as transmitted and returns what reached the wire.
    fn record_body(&mut self, body: Bytes) -> Bytes {
        if self.header.is_head() {
            return Bytes::new();
        }
        self.sent_body.extend_from_slice(&body);
        body
    }
}

async fn read_region(region: &FileRegion) -> Result<Bytes, SendError> {
    let mut file = File::open(region.path()).await?;
    let file_len = file.metadata().await?.len();
    let len = region
        .resolve_len(file_len)
        .ok_or_else(|| SendError::invalid_body(format!("offset {} is past the end of {}", region.offset(), region.path().display())))?;

    file.seek(SeekFrom::Start(region.offset())).await?;
    let mut content = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut content).await?;
    Ok(Bytes::from(content))
}

impl Transport for TestPayload {
    type Sent = Bytes;

    fn request(&self) -> &RequestHeader {
        &self.header
    }

    async fn send_response(mut self, status: StatusCode, headers: Headers, body: Bytes) -> Result<(Self, Self::Sent), SendError> {
        if let Some(e) = self.response.start_error() {
            return Err(e);
        }

        let payload_size = PayloadSize::from_len(body.len() as u64);
        check_body_allowed(status, payload_size)?;
        self.record_head(status, headers, payload_size);
        self.response = ResponseState::Sent;
        let sent = self.record_body(body);
        Ok((self, sent))
    }

    async fn send_file(mut self, status: StatusCode, headers: Headers, file: FileRegion) -> Result<(Self, Self::Sent), SendError> {
        if let Some(e) = self.response.start_error() {
            return Err(e);
        }

        let content = read_region(&file).await?;
        let payload_size = PayloadSize::from_len(content.len() as u64);
        check_body_allowed(status, payload_size)?;
        self.record_head(status, headers, payload_size);
        self.response = ResponseState::Sent;
        let sent = self.record_body(content);
        Ok((self, sent))
    }

    async fn begin_chunked(mut self, status: StatusCode, headers: Headers) -> Result<Self, SendError> {
        if let Some(e) = self.response.start_error() {
            return Err(e);
        }
        check_body_allowed(status, PayloadSize::Chunked)?;

        self.record_head(status, headers, PayloadSize::Chunked);
        self.response = ResponseState::Chunked;
        Ok(self)
    }

    async fn send_chunk(mut self, data: Bytes) -> Result<(Self, Self::Sent), ChunkError<Self>> {
        if let Some(e) = self.response.chunk_error() {
            return Err(ChunkError::new(self, e));
        }

        if data.is_empty() {
            return Ok((self, Bytes::new()));
        }

        let sent = self.record_body(data);
        if !sent.is_empty() {
            trace!(size = sent.len(), "recorded chunk");
            self.chunks.push(sent.clone());
        }
        Ok((self, sent))
    }

    async fn end_chunked(mut self) -> Result<Self, ChunkError<Self>> {
        if let Some(e) = self.response.chunk_error() {
            return Err(ChunkError::new(self, e));
        }

        self.response = ResponseState::Sent;
        Ok(self)
    }

    async fn stream_body(mut self, limit: usize) -> Result<(Self, BodyChunk), ParseError> {
        let chunk = self.read_body(limit)?;
        Ok((self, chunk))
    }

    async fn parse_multipart<F, D>(mut self, limit: usize, classify: F) -> Result<(Self, Multipart<D>), ParseError>
    where
        F: FnMut(&PartHeaders) -> SegmentDecision<D> + Send,
        D: AsyncWrite + Unpin + Send,
    {
        let boundary = self.header.multipart_boundary()?;
        let mut parser = MultipartParser::new(&boundary, limit, classify)?;

        loop {
            let chunk = self.read_body(limit)?;
            if let Some(outcome) = parser.feed(chunk).await? {
                return Ok((self, outcome));
            }
        }
    }
}
