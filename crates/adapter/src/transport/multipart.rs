use std::mem;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use crate::codec::{MultipartDecoder, MultipartItem};
use crate::ensure;
use crate::protocol::{BodyChunk, Multipart, Param, ParseError, Params, PartHeaders, SegmentDecision, Upload};

/// Where the body of the part in flight goes.
enum Segment<D> {
    Binary { name: String, data: BytesMut },
    File { name: String, filename: Option<String>, content_type: Option<String>, destination: D, size: u64 },
    Skip,
}

/// Turns the body reads of a transport into [`Params`].
///
/// Both transports drive it the same way: read up to `limit` bytes, hand the
/// read to [`feed`](Self::feed), stop once it returns an outcome.
pub(crate) struct MultipartParser<F, D> {
    decoder: MultipartDecoder,
    buffer: BytesMut,
    classify: F,
    segment: Option<Segment<D>>,
    params: Params<D>,
    limit: usize,
    read: usize,
}

impl<F, D> MultipartParser<F, D>
where
    F: FnMut(&PartHeaders) -> SegmentDecision<D>,
    D: AsyncWrite + Unpin,
{
    pub(crate) fn new(boundary: &str, limit: usize, classify: F) -> Result<Self, ParseError> {
        ensure!(limit > 0, ParseError::invalid_body("multipart limit must be positive"));

        Ok(Self {
            decoder: MultipartDecoder::new(boundary),
            buffer: BytesMut::new(),
            classify,
            segment: None,
            params: Params::new(),
            limit,
            read: 0,
        })
    }

    /// Consumes one body read. Returns the outcome once the closing delimiter
    /// was reached or the body outgrew the limit.
    pub(crate) async fn feed(&mut self, chunk: BodyChunk) -> Result<Option<Multipart<D>>, ParseError> {
        let eof = match chunk {
            BodyChunk::Data(bytes) => {
                self.read += bytes.len();
                if self.read > self.limit {
                    warn!(limit = self.limit, read = self.read, "multipart body exceeds limit");
                    self.abort();
                    return Ok(Some(Multipart::TooLarge));
                }
                self.buffer.extend_from_slice(&bytes);
                false
            }
            BodyChunk::Done => true,
        };

        loop {
            let item = if eof { self.decoder.decode_eof(&mut self.buffer)? } else { self.decoder.decode(&mut self.buffer)? };

            match item {
                Some(MultipartItem::End) => {
                    debug!(params = self.params.len(), read = self.read, "parsed multipart body");
                    return Ok(Some(Multipart::Parsed(mem::take(&mut self.params))));
                }
                Some(item) => self.handle(item).await?,
                None if eof => return Err(ParseError::malformed_multipart("body ended before the closing delimiter")),
                None => return Ok(None),
            }
        }
    }

    async fn handle(&mut self, item: MultipartItem) -> Result<(), ParseError> {
        match item {
            MultipartItem::Part(headers) => {
                let segment = match (self.classify)(&headers) {
                    SegmentDecision::Binary(name) => Segment::Binary { name, data: BytesMut::new() },
                    SegmentDecision::File(name, destination) => Segment::File {
                        name,
                        filename: headers.filename().map(str::to_owned),
                        content_type: headers.content_type().map(str::to_owned),
                        destination,
                        size: 0,
                    },
                    SegmentDecision::Skip => Segment::Skip,
                };
                trace!(name = ?headers.name(), "classified multipart part");
                self.segment = Some(segment);
            }

            MultipartItem::Data(bytes) => match &mut self.segment {
                Some(Segment::Binary { data, .. }) => data.extend_from_slice(&bytes),
                Some(Segment::File { destination, size, .. }) => {
                    destination.write_all(&bytes).await?;
                    *size += bytes.len() as u64;
                }
                Some(Segment::Skip) | None => {}
            },

            MultipartItem::PartEnd => match self.segment.take() {
                Some(Segment::Binary { name, data }) => self.params.bind(name, Param::Value(data.freeze())),
                Some(Segment::File { name, filename, content_type, mut destination, size }) => {
                    destination.flush().await?;
                    debug!(name = %name, size, "received multipart file");
                    self.params.bind(name, Param::File(Upload::new(filename, content_type, destination, size)));
                }
                Some(Segment::Skip) | None => {}
            },

            MultipartItem::End => {}
        }
        Ok(())
    }

    /// Drops the part in flight together with its buffer or destination, and
    /// the parts bound so far.
    fn abort(&mut self) {
        if let Some(Segment::File { name, size, .. }) = self.segment.take() {
            debug!(name = %name, size, "dropped partial multipart file");
        }
        if !self.params.is_empty() {
            debug!(params = self.params.len(), "dropped parsed multipart params");
            self.params = Params::new();
        }
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    /// Destination counting written bytes; the `Arc` strong count shows
    /// whether the parser still holds it.
    struct Tracked(Arc<AtomicUsize>);

    impl AsyncWrite for Tracked {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.0.fetch_add(buf.len(), Ordering::SeqCst);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    const BODY: &str = "--xx\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\r\n\
        hello\r\n\
        --xx\r\n\
        Content-Disposition: form-data; name=\"doc\"; filename=\"doc.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        0123456789\r\n\
        --xx--\r\n";

    async fn run<F>(body: &str, read_size: usize, limit: usize, classify: F) -> Result<Multipart<Vec<u8>>, ParseError>
    where
        F: FnMut(&PartHeaders) -> SegmentDecision<Vec<u8>>,
    {
        let mut parser = MultipartParser::new("xx", limit, classify)?;
        for chunk in body.as_bytes().chunks(read_size) {
            if let Some(outcome) = parser.feed(BodyChunk::Data(Bytes::copy_from_slice(chunk))).await? {
                return Ok(outcome);
            }
        }
        loop {
            if let Some(outcome) = parser.feed(BodyChunk::Done).await? {
                return Ok(outcome);
            }
        }
    }

    fn classify(part: &PartHeaders) -> SegmentDecision<Vec<u8>> {
        match (part.name(), part.is_file()) {
            (Some(name), true) => SegmentDecision::File(name.to_owned(), Vec::new()),
            (Some(name), false) => SegmentDecision::Binary(name.to_owned()),
            (None, _) => SegmentDecision::Skip,
        }
    }

    #[tokio::test]
    async fn binds_values_and_files() {
        for read_size in [1, 5, 64, BODY.len()] {
            let params = run(BODY, read_size, 1024, classify).await.unwrap().into_params().unwrap();

            assert_eq!(params.get("title").unwrap().as_bytes().unwrap(), "hello");
            let upload = params.get("doc").unwrap().as_upload().unwrap();
            assert_eq!(upload.filename(), Some("doc.txt"));
            assert_eq!(upload.content_type(), Some("text/plain"));
            assert_eq!(upload.size(), 10);
            assert_eq!(upload.destination(), b"0123456789");
        }
    }

    #[tokio::test]
    async fn budget_counts_every_byte() {
        let outcome = run(BODY, 16, BODY.len() - 1, |_| SegmentDecision::Skip).await.unwrap();
        assert!(outcome.is_too_large());

        let outcome = run(BODY, 16, BODY.len(), |_| SegmentDecision::Skip).await.unwrap();
        assert!(outcome.into_params().unwrap().is_empty());
    }

    #[tokio::test]
    async fn overflow_drops_file_in_flight() {
        let written = Arc::new(AtomicUsize::new(0));
        // the limit falls inside the body of the `doc` part
        let limit = BODY.find("0123456789").unwrap() + 5;

        let mut parser = MultipartParser::new("xx", limit, |part: &PartHeaders| match part.name() {
            Some("doc") => SegmentDecision::File("doc".to_owned(), Tracked(Arc::clone(&written))),
            _ => SegmentDecision::Skip,
        })
        .unwrap();

        let mut outcome = None;
        for chunk in BODY.as_bytes().chunks(8) {
            outcome = parser.feed(BodyChunk::Data(Bytes::copy_from_slice(chunk))).await.unwrap();
            if outcome.is_some() {
                break;
            }
        }

        assert!(outcome.unwrap().is_too_large());
        let partial = written.load(Ordering::SeqCst);
        assert!(partial > 0 && partial < 10, "{partial}");
        assert_eq!(Arc::strong_count(&written), 1);
    }

    #[tokio::test]
    async fn overflow_drops_completed_uploads() {
        let written = Arc::new(AtomicUsize::new(0));
        let classify = |part: &PartHeaders| match part.name() {
            Some("doc") => SegmentDecision::File("doc".to_owned(), Tracked(Arc::clone(&written))),
            Some(name) => SegmentDecision::Binary(name.to_owned()),
            None => SegmentDecision::Skip,
        };
        // covers the delimiter closing `doc` but not the final `--`
        let limit = BODY.find("--xx--").unwrap() + 4;

        let mut parser = MultipartParser::new("xx", limit, classify).unwrap();
        let mut outcome = parser.feed(BodyChunk::Data(Bytes::copy_from_slice(&BODY.as_bytes()[..limit]))).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(written.load(Ordering::SeqCst), 10);

        outcome = parser.feed(BodyChunk::Data(Bytes::copy_from_slice(&BODY.as_bytes()[limit..]))).await.unwrap();
        assert!(outcome.unwrap().is_too_large());
        assert_eq!(Arc::strong_count(&written), 1);
    }

    #[tokio::test]
    async fn classify_runs_before_body() {
        let mut seen = Vec::new();
        run(BODY, 3, 1024, |part| {
            seen.push(part.name().map(str::to_owned));
            SegmentDecision::Skip
        })
        .await
        .unwrap();

        assert_eq!(seen, vec![Some("title".to_owned()), Some("doc".to_owned())]);
    }

    #[tokio::test]
    async fn truncated_body_is_malformed() {
        let err = run(&BODY[..40], 8, 1024, classify).await.unwrap_err();
        assert!(matches!(err, ParseError::MalformedMultipart { .. }));
    }

    #[tokio::test]
    async fn zero_limit_rejected() {
        assert!(MultipartParser::<_, Vec<u8>>::new("xx", 0, classify).is_err());
    }
}
