//! Decoder for request bodies framed by `Content-Length`.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, PayloadItem};

/// Hands out whatever body bytes are buffered until `length` bytes were read,
/// then yields [`PayloadItem::Eof`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    /// bytes still to be read
    length: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.length == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let len = self.length.min(src.len() as u64);
        let bytes = src.split_to(len as usize).freeze();

        self.length -= len;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_length() {
        let mut buffer = BytesMut::from(&b"1012345678GET / HTTP/1.1\r\n"[..]);
        let mut decoder = LengthDecoder::new(10);

        let payload = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(payload.as_bytes().unwrap(), "1012345678");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert_eq!(&buffer[..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn waits_for_more() {
        let mut buffer = BytesMut::from(&b"abc"[..]);
        let mut decoder = LengthDecoder::new(5);

        assert_eq!(decoder.decode(&mut buffer).unwrap().unwrap().as_bytes().unwrap(), "abc");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"de");
        assert_eq!(decoder.decode(&mut buffer).unwrap().unwrap().as_bytes().unwrap(), "de");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
