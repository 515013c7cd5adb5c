use std::io::{self, ErrorKind};

use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::{Message, PayloadSize, ResponseHead, SendError};

/// Encodes one response at a time: a head, then payload items up to and
/// including [`PayloadItem::Eof`](crate::protocol::PayloadItem::Eof).
///
/// When the head has its body omitted (answers to HEAD) the head still
/// announces the real framing, but every payload item is dropped.
#[derive(Debug)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// True between a head and the end of its body.
    pub fn in_body(&self) -> bool {
        self.payload_encoder.is_some()
    }
}

impl Default for ResponseEncoder {
    fn default() -> Self {
        Self { header_encoder: HeaderEncoder, payload_encoder: None }
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                }

                let payload_encoder = if head.is_body_omitted() { PayloadEncoder::empty() } else { PayloadEncoder::from(payload_size) };
                self.payload_encoder = Some(payload_encoder);
                self.header_encoder.encode((head, payload_size), dst)
            }

            Message::Payload(payload_item) => {
                let Some(payload_encoder) = &mut self.payload_encoder else {
                    error!("expect response header but receive payload item");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                };

                let is_eof = payload_item.is_eof();
                let result = payload_encoder.encode(payload_item, dst);
                if is_eof {
                    self.payload_encoder.take();
                }

                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Headers, PayloadItem};
    use bytes::Bytes;
    use http::StatusCode;

    type Item = Message<(ResponseHead, PayloadSize), Bytes>;

    fn head(omit_body: bool) -> Item {
        Message::Header((ResponseHead::new(StatusCode::OK, Headers::new()).omit_body(omit_body), PayloadSize::Length(5)))
    }

    #[test]
    fn writes_head_and_body() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(head(false), &mut dst).unwrap();
        assert!(encoder.in_body());
        encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"hello"))), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::<Bytes>::Eof), &mut dst).unwrap();

        assert!(!encoder.in_body());
        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello");
    }

    #[test]
    fn omitted_body_keeps_length_header() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(head(true), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"hel"))), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"lo"))), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::<Bytes>::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\n");
    }

    #[test]
    fn payload_without_head_rejected() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        let item: Item = Message::Payload(PayloadItem::Eof);
        assert!(encoder.encode(item, &mut dst).is_err());
    }
}
