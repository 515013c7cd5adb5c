use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::ensure;
use crate::protocol::{PayloadItem, SendError};

/// Writes a body announced with `Content-Length`.
///
/// Writing more bytes than announced, or finishing short of the announced
/// length, is an [`SendError::InvalidBody`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    remaining: u64,
    eof: bool,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length, eof: false }
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(bytes) => {
                let len = bytes.remaining() as u64;
                ensure!(len <= self.remaining, SendError::invalid_body(format!("body exceeds content-length by {} bytes", len - self.remaining)));

                dst.reserve(len as usize);
                dst.put(bytes);
                self.remaining -= len;
                Ok(())
            }
            PayloadItem::Eof => {
                ensure!(self.remaining == 0, SendError::invalid_body(format!("body ended {} bytes short of content-length", self.remaining)));
                self.eof = true;
                Ok(())
            }
        }
    }
}
