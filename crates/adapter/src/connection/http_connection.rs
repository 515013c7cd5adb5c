use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{error, info};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::{Headers, HttpError, Message, ParseError, PayloadItem, PayloadSize, ResponseHead};
use crate::transport::HttpPayload;

/// Default size of the read buffer
const DEFAULT_READ_BUFFER: usize = 8 * 1024;

/// An HTTP/1.1 connection between two requests.
///
/// [`next_request`](Self::next_request) reads the next request head and hands
/// the connection over to an [`HttpPayload`]; [`HttpPayload::finish`] gives it
/// back once the exchange is complete and the connection can be reused.
///
/// # Type Parameters
///
/// * `R`: The async readable stream type
/// * `W`: The async writable stream type
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
}

impl<R, W> fmt::Debug for HttpConnection<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection").field("read_buffered", &self.framed_read.read_buffer().len()).finish_non_exhaustive()
    }
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_capacity(reader, writer, DEFAULT_READ_BUFFER)
    }

    pub fn with_capacity(reader: R, writer: W, read_buffer: usize) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), read_buffer),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
        }
    }

    pub(crate) fn from_parts(framed_read: FramedRead<R, RequestDecoder>, framed_write: FramedWrite<W, ResponseEncoder>) -> Self {
        Self { framed_read, framed_write }
    }

    /// Reads the next request head.
    ///
    /// Returns `None` when the peer closed the connection between requests. A
    /// malformed head is answered with `400 Bad Request` before the error is
    /// returned.
    pub async fn next_request(mut self) -> Result<Option<HttpPayload<R, W>>, HttpError> {
        match self.framed_read.next().await {
            Some(Ok(Message::Header((header, payload_size)))) => {
                Ok(Some(HttpPayload::new(header, payload_size, self.framed_read, self.framed_write)))
            }

            Some(Ok(Message::Payload(_))) => {
                error!("receive body while expecting a request head");
                self.send_error(StatusCode::BAD_REQUEST).await?;
                Err(ParseError::invalid_body("need header while receive body").into())
            }

            Some(Err(e)) => {
                error!(cause = %e, "can't receive next request");
                self.send_error(StatusCode::BAD_REQUEST).await?;
                Err(e.into())
            }

            None => {
                info!("cant read more request, break this connection down");
                Ok(None)
            }
        }
    }

    /// Serves requests with `handler` until the connection closes.
    pub async fn process<H>(self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler<HttpPayload<R, W>>,
    {
        let mut connection = self;
        loop {
            let Some(payload) = connection.next_request().await? else {
                return Ok(());
            };

            let payload = handler.call(payload).await.map_err(HttpError::handler)?;

            match payload.finish().await? {
                Some(next) => connection = next,
                None => return Ok(()),
            }
        }
    }

    async fn send_error(&mut self, status: StatusCode) -> Result<(), HttpError> {
        let headers = Headers::new().with("connection", "close")?;
        let head = ResponseHead::new(status, headers);

        self.framed_write.feed(Message::<_, Bytes>::Header((head, PayloadSize::Empty))).await?;
        self.framed_write.send(Message::<_, Bytes>::Payload(PayloadItem::Eof)).await?;
        Ok(())
    }
}
