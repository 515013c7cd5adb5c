use bytes::{Buf, Bytes};

/// One frame of a message on the wire: the head, then the body pieces.
///
/// `T` is the request head on the read side and the response head (plus its
/// framing) on the write side.
#[derive(Debug)]
pub enum Message<T, Data: Buf = Bytes> {
    Header(T),
    Payload(PayloadItem<Data>),
}

/// A piece of a message body; `Eof` closes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    Chunk(Data),
    Eof,
}

/// How a message body is framed on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// `content-length` framing
    Length(u64),
    /// `transfer-encoding: chunked` framing
    Chunked,
    /// no body at all
    Empty,
}

impl PayloadSize {
    /// `Empty` for a zero length body, `Length` otherwise.
    pub fn from_len(len: u64) -> Self {
        if len == 0 { PayloadSize::Empty } else { PayloadSize::Length(len) }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}

impl<D: Buf> PayloadItem<D> {
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }
}

impl PayloadItem {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}
