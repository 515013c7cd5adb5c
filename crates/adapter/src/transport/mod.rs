//! The contract between an application and the transport carrying one
//! request/response exchange.
//!
//! A transport value is a move-once token: every operation takes it by value
//! and hands it back on success, so a stale token can never be used twice.
//! The contract has two implementations:
//!
//! - [`HttpPayload`]: reads and writes a real connection
//! - [`TestPayload`]: an in-memory request that records everything sent
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use http::StatusCode;
//! use micro_adapter::protocol::{BodyChunk, Headers, HttpError};
//! use micro_adapter::transport::Transport;
//!
//! async fn echo<T: Transport>(mut payload: T) -> Result<T, HttpError> {
//!     let mut body = Vec::new();
//!     loop {
//!         let (next, chunk) = payload.stream_body(4096).await?;
//!         payload = next;
//!         match chunk {
//!             BodyChunk::Data(bytes) => body.extend_from_slice(&bytes),
//!             BodyChunk::Done => break,
//!         }
//!     }
//!
//!     let (payload, _) = payload.send_response(StatusCode::OK, Headers::new(), Bytes::from(body)).await?;
//!     Ok(payload)
//! }
//! ```

use bytes::Bytes;
use http::StatusCode;
use tokio::io::AsyncWrite;

use crate::codec::forbids_body;
use crate::protocol::{
    BodyChunk, ChunkError, FileRegion, Headers, Multipart, ParseError, PartHeaders, PayloadSize, RequestHeader, SegmentDecision, SendError,
};

mod http_payload;
mod multipart;
mod test_payload;

pub use http_payload::HttpPayload;
pub use test_payload::TestPayload;

/// Size of the reads used to stream a file into a response body
pub const FILE_READ_BUFFER: usize = 16 * 1024;

/// Request/response operations of one exchange.
///
/// `Transport` is the `Send` flavour used with multi-threaded runtimes;
/// `LocalTransport` drops the `Send` requirement on the returned futures.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport: Sized {
    /// What a successful send hands back besides the token. The production
    /// transport keeps nothing; the test transport returns the body bytes
    /// that would have been written.
    type Sent;

    /// The head of the request being served.
    fn request(&self) -> &RequestHeader;

    /// Sends a complete response with an in-memory body.
    ///
    /// For HEAD requests the body is not transmitted but `content-length`
    /// still announces its size. A non-empty body with a 1xx, 204 or 304
    /// status is rejected before anything is written.
    async fn send_response(self, status: StatusCode, headers: Headers, body: Bytes) -> Result<(Self, Self::Sent), SendError>;

    /// Sends a complete response whose body is read from a file region.
    async fn send_file(self, status: StatusCode, headers: Headers, file: FileRegion) -> Result<(Self, Self::Sent), SendError>;

    /// Sends the status line and headers of a `Transfer-Encoding: chunked`
    /// response. Fails for 1xx, 204 and 304, which carry no body. The body follows through [`send_chunk`](Self::send_chunk).
    async fn begin_chunked(self, status: StatusCode, headers: Headers) -> Result<Self, SendError>;

    /// Sends `data` as exactly one chunk. Empty `data` sends nothing.
    ///
    /// The token comes back inside the error as well, so the caller decides
    /// whether to carry on.
    async fn send_chunk(self, data: Bytes) -> Result<(Self, Self::Sent), ChunkError<Self>>;

    /// Terminates a chunked response.
    async fn end_chunked(self) -> Result<Self, ChunkError<Self>>;

    /// Reads at most `limit` bytes of the request body that were not
    /// delivered before. Once [`BodyChunk::Done`] is returned every later call
    /// returns it again.
    async fn stream_body(self, limit: usize) -> Result<(Self, BodyChunk), ParseError>;

    /// Parses a `multipart/*` request body part by part.
    ///
    /// `classify` sees each part head before any of its body is read and
    /// decides where the body goes. `limit` is both the read size and the
    /// budget for the whole body: once more than `limit` bytes were read the
    /// part in flight is dropped and [`Multipart::TooLarge`] is returned.
    ///
    /// On `TooLarge` every destination handed out by `classify` is dropped,
    /// including those of parts that were already complete. Callers writing
    /// to files should remember the paths they opened to clean them up.
    async fn parse_multipart<F, D>(self, limit: usize, classify: F) -> Result<(Self, Multipart<D>), ParseError>
    where
        F: FnMut(&PartHeaders) -> SegmentDecision<D> + Send,
        D: AsyncWrite + Unpin + Send;
}

/// Progress of the response side of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseState {
    /// nothing sent yet
    Pending,
    /// head of a chunked response sent, body open
    Chunked,
    /// response complete
    Sent,
}

impl ResponseState {
    /// Error for starting a new response in this state.
    pub(crate) fn start_error(self) -> Option<SendError> {
        match self {
            ResponseState::Pending => None,
            ResponseState::Chunked | ResponseState::Sent => Some(SendError::AlreadySent),
        }
    }

    /// Error for sending chunk data or the terminator in this state.
    pub(crate) fn chunk_error(self) -> Option<SendError> {
        match self {
            ResponseState::Chunked => None,
            ResponseState::Pending => Some(SendError::NotChunked),
            ResponseState::Sent => Some(SendError::AlreadySent),
        }
    }
}

/// Rejects a body for statuses that must not carry one.
pub(crate) fn check_body_allowed(status: StatusCode, payload_size: PayloadSize) -> Result<(), SendError> {
    if forbids_body(status) && !payload_size.is_empty() {
        return Err(SendError::invalid_body(format!("status {status} must not carry a body")));
    }
    Ok(())
}
