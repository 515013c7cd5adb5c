use std::fmt;
use std::io::SeekFrom;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::StatusCode;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::connection::HttpConnection;
use crate::ensure;
use crate::protocol::{
    BodyChunk, ChunkError, FileRegion, Headers, HttpError, Message, Multipart, ParseError, PartHeaders, PayloadItem, PayloadSize,
    RequestHeader, ResponseHead, SegmentDecision, SendError,
};
use crate::transport::multipart::MultipartParser;
use crate::transport::{FILE_READ_BUFFER, ResponseState, Transport, check_body_allowed};

type ResponseMessage = Message<(ResponseHead, PayloadSize), Bytes>;

/// One request/response exchange on a live connection.
///
/// Obtained from [`HttpConnection::next_request`]. After responding, hand it
/// to [`HttpPayload::finish`] to get the connection back for the next request.
pub struct HttpPayload<R, W> {
    header: RequestHeader,
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    /// bytes of a body frame larger than the last read limit
    pending: Bytes,
    body_eof: bool,
    /// `Expect: 100-continue` not answered yet
    expect_continue: bool,
    response: ResponseState,
    keep_alive: bool,
}

impl<R, W> fmt::Debug for HttpPayload<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPayload")
            .field("header", &self.header)
            .field("pending", &self.pending.len())
            .field("body_eof", &self.body_eof)
            .field("expect_continue", &self.expect_continue)
            .field("response", &self.response)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

impl<R, W> HttpPayload<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(
        header: RequestHeader,
        payload_size: PayloadSize,
        framed_read: FramedRead<R, RequestDecoder>,
        framed_write: FramedWrite<W, ResponseEncoder>,
    ) -> Self {
        let expect_continue = header.expects_continue() && !payload_size.is_empty();
        let keep_alive = header.keep_alive();
        Self {
            header,
            framed_read,
            framed_write,
            pending: Bytes::new(),
            body_eof: false,
            expect_continue,
            response: ResponseState::Pending,
            keep_alive,
        }
    }

    /// Whether the connection can serve another request after this one.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Completes the exchange and returns the connection when it can be
    /// reused.
    ///
    /// A chunked response still open is terminated. When no response was
    /// sent at all a `500` is written and the connection is closed. Unread
    /// request body is drained so the next request head can be read.
    pub async fn finish(mut self) -> Result<Option<HttpConnection<R, W>>, HttpError> {
        match self.response {
            ResponseState::Pending => {
                warn!(uri = %self.header.uri(), "no response was sent, responding with 500");
                self.keep_alive = false;
                self.write_response(StatusCode::INTERNAL_SERVER_ERROR, Headers::new(), Bytes::new()).await?;
            }
            ResponseState::Chunked => {
                debug!("terminating open chunked response");
                self.write_chunk_end().await?;
            }
            ResponseState::Sent => {}
        }

        // the client may still be waiting for permission to send the body
        if self.expect_continue && !self.body_eof {
            self.keep_alive = false;
        }

        if self.keep_alive {
            self.skip_body().await?;
        }

        if !self.keep_alive {
            info!("connection is not reusable, shutting down");
            self.framed_write.get_mut().shutdown().await.map_err(SendError::io)?;
            return Ok(None);
        }

        Ok(Some(HttpConnection::from_parts(self.framed_read, self.framed_write)))
    }

    async fn skip_body(&mut self) -> Result<(), ParseError> {
        self.pending = Bytes::new();
        let mut skipped = 0usize;
        while let BodyChunk::Data(bytes) = self.read_body(usize::MAX).await? {
            skipped += bytes.len();
        }
        if skipped > 0 {
            debug!(size = skipped, "skipped unread request body");
        }
        Ok(())
    }

    async fn send_continue(&mut self) -> Result<(), ParseError> {
        self.expect_continue = false;
        if self.response != ResponseState::Pending {
            return Ok(());
        }

        let writer = self.framed_write.get_mut();
        writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
        writer.flush().await?;
        info!("receive expect request header, sent continue response");
        Ok(())
    }

    async fn read_body(&mut self, limit: usize) -> Result<BodyChunk, ParseError> {
        ensure!(limit > 0, ParseError::invalid_body("read limit must be positive"));

        if !self.pending.is_empty() {
            let len = limit.min(self.pending.len());
            return Ok(BodyChunk::Data(self.pending.split_to(len)));
        }

        if self.body_eof {
            return Ok(BodyChunk::Done);
        }

        if self.expect_continue {
            self.send_continue().await?;
        }

        match self.framed_read.next().await {
            Some(Ok(Message::Payload(PayloadItem::Chunk(mut bytes)))) => {
                if bytes.len() > limit {
                    self.pending = bytes.split_off(limit);
                }
                Ok(BodyChunk::Data(bytes))
            }
            Some(Ok(Message::Payload(PayloadItem::Eof))) => {
                self.body_eof = true;
                Ok(BodyChunk::Done)
            }
            Some(Ok(Message::Header(_))) => {
                error!("receive request head while reading request body");
                Err(ParseError::invalid_body("request head inside request body"))
            }
            Some(Err(e)) => {
                self.keep_alive = false;
                Err(e)
            }
            None => {
                self.keep_alive = false;
                Err(ParseError::invalid_body("connection closed before the request body ended"))
            }
        }
    }

    fn head(&self, status: StatusCode, headers: Headers) -> ResponseHead {
        ResponseHead::new(status, headers).omit_body(self.header.is_head())
    }

    async fn write_response(&mut self, status: StatusCode, headers: Headers, body: Bytes) -> Result<(), SendError> {
        if let Some(e) = self.response.start_error() {
            return Err(e);
        }

        let payload_size = PayloadSize::from_len(body.len() as u64);
        check_body_allowed(status, payload_size)?;
        let head = self.head(status, headers);

        self.response = ResponseState::Sent;
        self.framed_write.feed(ResponseMessage::Header((head, payload_size))).await?;
        if !body.is_empty() {
            self.framed_write.feed(ResponseMessage::Payload(PayloadItem::Chunk(body))).await?;
        }
        self.framed_write.send(ResponseMessage::Payload(PayloadItem::Eof)).await
    }

    async fn write_file(&mut self, status: StatusCode, headers: Headers, region: FileRegion) -> Result<(), SendError> {
        if let Some(e) = self.response.start_error() {
            return Err(e);
        }

        let mut file = File::open(region.path()).await?;
        let file_len = file.metadata().await?.len();
        let len = region
            .resolve_len(file_len)
            .ok_or_else(|| SendError::invalid_body(format!("offset {} is past the end of {}", region.offset(), region.path().display())))?;

        let payload_size = PayloadSize::from_len(len);
        check_body_allowed(status, payload_size)?;
        let head = self.head(status, headers);
        self.response = ResponseState::Sent;
        self.framed_write.feed(ResponseMessage::Header((head, payload_size))).await?;

        if !self.header.is_head() && len > 0 {
            if region.offset() > 0 {
                file.seek(SeekFrom::Start(region.offset())).await?;
            }

            let mut stream = ReaderStream::with_capacity(file.take(len), FILE_READ_BUFFER);
            while let Some(chunk) = stream.next().await {
                self.framed_write.feed(ResponseMessage::Payload(PayloadItem::Chunk(chunk?))).await?;
            }
        }

        debug!(path = %region.path().display(), size = len, "sent file");
        self.framed_write.send(ResponseMessage::Payload(PayloadItem::Eof)).await
    }

    async fn write_chunk_end(&mut self) -> Result<(), SendError> {
        self.response = ResponseState::Sent;
        self.framed_write.send(ResponseMessage::Payload(PayloadItem::Eof)).await
    }
}

impl<R, W> Transport for HttpPayload<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    type Sent = ();

    fn request(&self) -> &RequestHeader {
        &self.header
    }

    async fn send_response(mut self, status: StatusCode, headers: Headers, body: Bytes) -> Result<(Self, Self::Sent), SendError> {
        self.write_response(status, headers, body).await?;
        Ok((self, ()))
    }

    async fn send_file(mut self, status: StatusCode, headers: Headers, file: FileRegion) -> Result<(Self, Self::Sent), SendError> {
        self.write_file(status, headers, file).await?;
        Ok((self, ()))
    }

    async fn begin_chunked(mut self, status: StatusCode, headers: Headers) -> Result<Self, SendError> {
        if let Some(e) = self.response.start_error() {
            return Err(e);
        }
        check_body_allowed(status, PayloadSize::Chunked)?;

        let head = self.head(status, headers);
        self.response = ResponseState::Chunked;
        self.framed_write.send(ResponseMessage::Header((head, PayloadSize::Chunked))).await?;
        Ok(self)
    }

    async fn send_chunk(mut self, data: Bytes) -> Result<(Self, Self::Sent), ChunkError<Self>> {
        if let Some(e) = self.response.chunk_error() {
            return Err(ChunkError::new(self, e));
        }

        if data.is_empty() {
            return Ok((self, ()));
        }

        let sent = self.framed_write.send(ResponseMessage::Payload(PayloadItem::Chunk(data))).await;
        match sent {
            Ok(()) => Ok((self, ())),
            Err(e) => {
                self.keep_alive = false;
                Err(ChunkError::new(self, e))
            }
        }
    }

    async fn end_chunked(mut self) -> Result<Self, ChunkError<Self>> {
        if let Some(e) = self.response.chunk_error() {
            return Err(ChunkError::new(self, e));
        }

        let ended = self.write_chunk_end().await;
        match ended {
            Ok(()) => Ok(self),
            Err(e) => {
                self.keep_alive = false;
                Err(ChunkError::new(self, e))
            }
        }
    }

    async fn stream_body(mut self, limit: usize) -> Result<(Self, BodyChunk), ParseError> {
        let chunk = self.read_body(limit).await?;
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
            let chunk = self.read_body(limit).await?;
            if let Some(outcome) = parser.feed(chunk).await? {
                if outcome.is_too_large() {
                    // the rest of the body stays unread
                    self.keep_alive = false;
                }
                return Ok((self, outcome));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Param;
    use std::io::Write;
    use tokio::io::DuplexStream;

    type Payload = HttpPayload<&'static [u8], DuplexStream>;

    /// Reads the next request of `input` and returns it with the peer end of
    /// the response pipe.
    async fn payload(input: &'static str) -> (Payload, DuplexStream) {
        let (writer, peer) = tokio::io::duplex(64 * 1024);
        let connection = HttpConnection::new(input.as_bytes(), writer);
        let payload = connection.next_request().await.unwrap().unwrap();
        (payload, peer)
    }

    async fn written(payload: Payload, mut peer: DuplexStream) -> String {
        drop(payload);
        let mut out = Vec::new();
        peer.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn full_response_bytes() {
        let (payload, peer) = payload("GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;

        let headers = Headers::new().with("Content-Type", "text/plain").unwrap();
        let (payload, ()) = payload.send_response(StatusCode::OK, headers, Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(written(payload, peer).await, "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\ncontent-length: 5\r\n\r\nhello");
    }

    #[tokio::test]
    async fn head_keeps_length_drops_body() {
        let (payload, peer) = payload("HEAD / HTTP/1.1\r\n\r\n").await;

        let (payload, ()) = payload.send_response(StatusCode::OK, Headers::new(), Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(written(payload, peer).await, "HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\n");
    }

    #[tokio::test]
    async fn no_content_never_framed_with_body() {
        {
            let (payload, peer) = payload("GET / HTTP/1.1\r\n\r\n").await;
            let (payload, ()) = payload.send_response(StatusCode::NO_CONTENT, Headers::new(), Bytes::new()).await.unwrap();
            assert_eq!(written(payload, peer).await, "HTTP/1.1 204 No Content\r\n\r\n");
        }

        {
            let (payload, _peer) = payload("GET / HTTP/1.1\r\n\r\n").await;
            let err = payload.send_response(StatusCode::NO_CONTENT, Headers::new(), Bytes::from_static(b"x")).await.err().unwrap();
            assert!(matches!(err, SendError::InvalidBody { .. }));
        }

        let (payload, _peer) = payload("GET / HTTP/1.1\r\n\r\n").await;
        let err = payload.begin_chunked(StatusCode::NOT_MODIFIED, Headers::new()).await.err().unwrap();
        assert!(matches!(err, SendError::InvalidBody { .. }));
    }

    #[tokio::test]
    async fn debug_skips_framed_io() {
        let (payload, _peer) = payload("GET /debug HTTP/1.1\r\n\r\n").await;
        let debug = format!("{payload:?}");
        assert!(debug.starts_with("HttpPayload {"), "{debug}");
        assert!(debug.contains("response: Pending"), "{debug}");
        assert!(debug.contains("keep_alive: true"), "{debug}");
    }

    #[tokio::test]
    async fn second_response_rejected() {
        let (payload, _peer) = payload("GET / HTTP/1.1\r\n\r\n").await;

        let (payload, ()) = payload.send_response(StatusCode::OK, Headers::new(), Bytes::new()).await.unwrap();
        let err = payload.send_response(StatusCode::OK, Headers::new(), Bytes::new()).await.err().unwrap();
        assert!(matches!(err, SendError::AlreadySent));
    }

    #[tokio::test]
    async fn chunk_frames() {
        let (payload, peer) = payload("GET / HTTP/1.1\r\n\r\n").await;

        let payload = payload.begin_chunked(StatusCode::OK, Headers::new()).await.unwrap();
        let (payload, ()) = payload.send_chunk(Bytes::from_static(b"hello")).await.unwrap();
        let (payload, ()) = payload.send_chunk(Bytes::new()).await.unwrap();
        let (payload, ()) = payload.send_chunk(Bytes::from_static(b" world")).await.unwrap();
        let payload = payload.end_chunked().await.unwrap();

        assert_eq!(
            written(payload, peer).await,
            "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn chunk_without_chunked_response() {
        let (payload, _peer) = payload("GET / HTTP/1.1\r\n\r\n").await;

        let err = payload.send_chunk(Bytes::from_static(b"x")).await.err().unwrap();
        assert!(matches!(err.reason(), SendError::NotChunked));

        let payload = err.into_payload();
        let (payload, ()) = payload.send_response(StatusCode::OK, Headers::new(), Bytes::new()).await.unwrap();
        let err = payload.send_chunk(Bytes::from_static(b"x")).await.err().unwrap();
        assert!(matches!(err.reason(), SendError::AlreadySent));
    }

    #[tokio::test]
    async fn file_region() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let (payload, peer) = payload("GET / HTTP/1.1\r\n\r\n").await;
        let region = FileRegion::new(file.path()).range(2, Some(5));
        let (payload, ()) = payload.send_file(StatusCode::OK, Headers::new(), region).await.unwrap();

        assert_eq!(written(payload, peer).await, "HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\n23456");
    }

    #[tokio::test]
    async fn file_offset_past_end() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let (payload, _peer) = payload("GET / HTTP/1.1\r\n\r\n").await;
        let region = FileRegion::new(file.path()).range(1, None);
        let err = payload.send_file(StatusCode::OK, Headers::new(), region).await.err().unwrap();
        assert!(matches!(err, SendError::InvalidBody { .. }));
    }

    #[tokio::test]
    async fn body_split_by_limit() {
        let (mut payload, _peer) = payload("POST / HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world").await;

        let mut reads = Vec::new();
        loop {
            let (next, chunk) = payload.stream_body(4).await.unwrap();
            payload = next;
            match chunk {
                BodyChunk::Data(bytes) => reads.push(bytes),
                BodyChunk::Done => break,
            }
        }

        assert!(reads.iter().all(|read| read.len() <= 4));
        assert_eq!(reads.concat(), b"hello world");

        let (_, chunk) = payload.stream_body(4).await.unwrap();
        assert!(chunk.is_done());
    }

    #[tokio::test]
    async fn chunked_request_body() {
        let (payload, _peer) = payload("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n").await;

        let (payload, chunk) = payload.stream_body(1024).await.unwrap();
        assert_eq!(chunk.into_bytes().unwrap(), "abc");
        let (payload, chunk) = payload.stream_body(1024).await.unwrap();
        assert_eq!(chunk.into_bytes().unwrap(), "de");
        let (_, chunk) = payload.stream_body(1024).await.unwrap();
        assert!(chunk.is_done());
    }

    #[tokio::test]
    async fn zero_limit_rejected() {
        let (payload, _peer) = payload("POST / HTTP/1.1\r\nContent-Length: 1\r\n\r\na").await;
        assert!(matches!(payload.stream_body(0).await, Err(ParseError::InvalidBody { .. })));
    }

    #[tokio::test]
    async fn continue_sent_on_first_read() {
        let (payload, peer) = payload("POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nok").await;

        let (payload, chunk) = payload.stream_body(16).await.unwrap();
        assert_eq!(chunk.into_bytes().unwrap(), "ok");
        let (payload, ()) = payload.send_response(StatusCode::NO_CONTENT, Headers::new(), Bytes::new()).await.unwrap();

        assert_eq!(written(payload, peer).await, "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n");
    }

    #[tokio::test]
    async fn no_continue_without_read() {
        let (payload, peer) = payload("POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nok").await;

        let (payload, ()) = payload.send_response(StatusCode::OK, Headers::new(), Bytes::new()).await.unwrap();
        assert!(payload.finish().await.unwrap().is_none());

        let mut out = String::new();
        let mut peer = peer;
        peer.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
    }

    #[tokio::test]
    async fn keep_alive_drains_unread_body() {
        let (payload, _peer) =
            payload("POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        let (payload, ()) = payload.send_response(StatusCode::OK, Headers::new(), Bytes::new()).await.unwrap();
        let connection = payload.finish().await.unwrap().unwrap();

        let payload = connection.next_request().await.unwrap().unwrap();
        assert_eq!(payload.request().uri().path(), "/b");
        assert!(!payload.is_keep_alive());

        let (payload, ()) = payload.send_response(StatusCode::OK, Headers::new(), Bytes::new()).await.unwrap();
        assert!(payload.finish().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unanswered_request_gets_500() {
        let (payload, mut peer) = payload("GET / HTTP/1.1\r\n\r\n").await;
        assert!(payload.finish().await.unwrap().is_none());

        let mut out = String::new();
        peer.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n");
    }

    #[tokio::test]
    async fn finish_closes_open_chunked_response() {
        let (payload, mut peer) = payload("GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        let payload = payload.begin_chunked(StatusCode::OK, Headers::new()).await.unwrap();
        let (payload, ()) = payload.send_chunk(Bytes::from_static(b"ab")).await.unwrap();
        assert!(payload.finish().await.unwrap().is_none());

        let mut out = String::new();
        peer.read_to_string(&mut out).await.unwrap();
        assert!(out.ends_with("2\r\nab\r\n0\r\n\r\n"));
    }

    const UPLOAD: &str = "POST /upload HTTP/1.1\r\n\
        Content-Type: multipart/form-data; boundary=zz\r\n\
        Content-Length: 129\r\n\r\n\
        --zz\r\n\
        Content-Disposition: form-data; name=\"tags[]\"\r\n\r\n\
        red\r\n\
        --zz\r\n\
        Content-Disposition: form-data; name=\"tags[]\"\r\n\r\n\
        blue\r\n\
        --zz--\r\n";

    #[tokio::test]
    async fn multipart_over_the_wire() {
        let (payload, _peer) = payload(UPLOAD).await;

        let classify = |part: &PartHeaders| SegmentDecision::<Vec<u8>>::Binary(part.name().unwrap_or_default().to_owned());
        let (payload, outcome) = payload.parse_multipart(7, classify).await.unwrap();
        assert!(outcome.is_too_large());
        assert!(!payload.is_keep_alive());

        let (payload, _peer) = self::payload(UPLOAD).await;
        let (payload, outcome) = payload.parse_multipart(1024, classify).await.unwrap();
        let params = outcome.into_params().unwrap();
        let tags: Vec<_> = params.get("tags").and_then(Param::as_list).unwrap().iter().map(|p| p.as_bytes().unwrap().clone()).collect();
        assert_eq!(tags, vec![Bytes::from_static(b"red"), Bytes::from_static(b"blue")]);
        assert!(payload.is_keep_alive());
    }
}
