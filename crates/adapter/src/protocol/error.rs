use std::error::Error;
use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("handler error: {source}")]
    HandlerError { source: Box<dyn Error + Send + Sync> },
}

impl HttpError {
    pub fn handler<E: Into<Box<dyn Error + Send + Sync>>>(e: E) -> Self {
        Self::HandlerError { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("malformed multipart body: {reason}")]
    MalformedMultipart { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn malformed_multipart<S: ToString>(str: S) -> Self {
        Self::MalformedMultipart { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("response has already been sent")]
    AlreadySent,

    #[error("response is not a chunked response")]
    NotChunked,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Failure to send one chunk of a chunked response.
///
/// The payload travels back with the error so the caller can decide whether
/// to abort the response or keep using the connection. After an
/// [`SendError::Io`] cause the connection should be treated as dead.
#[derive(Error)]
#[error("send chunk error: {source}")]
pub struct ChunkError<P> {
    payload: P,
    #[source]
    source: SendError,
}

impl<P> ChunkError<P> {
    pub fn new(payload: P, source: SendError) -> Self {
        Self { payload, source }
    }

    pub fn reason(&self) -> &SendError {
        &self.source
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    pub fn into_parts(self) -> (P, SendError) {
        (self.payload, self.source)
    }
}

impl<P> fmt::Debug for ChunkError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkError").field("source", &self.source).finish_non_exhaustive()
    }
}

impl<P> From<ChunkError<P>> for SendError {
    fn from(e: ChunkError<P>) -> Self {
        e.source
    }
}

impl<P> From<ChunkError<P>> for HttpError {
    fn from(e: ChunkError<P>) -> Self {
        Self::ResponseError { source: e.source }
    }
}
