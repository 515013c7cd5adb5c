//! Serializes a [`ResponseHead`] into the status line and header block.
//!
//! Headers are written in the order of the head's [`Headers`](crate::protocol::Headers)
//! list, names exactly as given. The framing header matching the
//! [`PayloadSize`] replaces a same-named caller header in place, otherwise it
//! is appended after the caller headers.

use std::io::{self, Write};

use bytes::{BufMut, BytesMut};
use http::{HeaderValue, StatusCode, header};
use tokio_util::codec::Encoder;

use crate::protocol::{Headers, PayloadSize, ResponseHead, SendError};

/// Initial buffer size reserved for a response head
const INIT_HEADER_SIZE: usize = 1024;

#[derive(Debug)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;
        let status = head.status();

        dst.reserve(INIT_HEADER_SIZE);
        write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or(""))?;

        apply_framing(head.headers_mut(), status, payload_size);

        for (name, value) in head.headers().iter() {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Adds the framing header announcing `payload_size` to `headers`.
pub(crate) fn apply_framing(headers: &mut Headers, status: StatusCode, payload_size: PayloadSize) {
    match payload_size {
        PayloadSize::Length(n) => headers.set(header::CONTENT_LENGTH.as_str(), HeaderValue::from(n)),
        PayloadSize::Chunked => {
            headers.remove(header::CONTENT_LENGTH.as_str());
            headers.set(header::TRANSFER_ENCODING.as_str(), HeaderValue::from_static("chunked"));
        }
        PayloadSize::Empty if forbids_body(status) => {}
        PayloadSize::Empty => headers.set(header::CONTENT_LENGTH.as_str(), HeaderValue::from_static("0")),
    }
}

/// 1xx, 204 and 304 responses never carry a body or a framing header.
pub(crate) fn forbids_body(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

/// Writer over `BytesMut` for `write!` formatting.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(head: ResponseHead, payload_size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, payload_size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn appends_content_length_after_caller_headers() {
        let headers = Headers::new().with("X-Request-Id", "7").unwrap().with("Content-Type", "text/plain").unwrap();
        let head = ResponseHead::new(StatusCode::OK, headers);

        assert_eq!(
            encode(head, PayloadSize::Length(5)),
            "HTTP/1.1 200 OK\r\nX-Request-Id: 7\r\nContent-Type: text/plain\r\ncontent-length: 5\r\n\r\n"
        );
    }

    #[test]
    fn replaces_caller_content_length_in_place() {
        let headers = Headers::new().with("Content-Length", "99").unwrap().with("X-After", "1").unwrap();
        let head = ResponseHead::new(StatusCode::CREATED, headers);

        assert_eq!(encode(head, PayloadSize::Length(3)), "HTTP/1.1 201 Created\r\nContent-Length: 3\r\nX-After: 1\r\n\r\n");
    }

    #[test]
    fn chunked_drops_content_length() {
        let headers = Headers::new().with("content-length", "10").unwrap();
        let head = ResponseHead::new(StatusCode::OK, headers);

        assert_eq!(encode(head, PayloadSize::Chunked), "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n");
    }

    #[test]
    fn empty_body() {
        assert_eq!(encode(ResponseHead::new(StatusCode::OK, Headers::new()), PayloadSize::Empty), "HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n");
        assert_eq!(encode(ResponseHead::new(StatusCode::NO_CONTENT, Headers::new()), PayloadSize::Empty), "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn unknown_status_has_empty_reason() {
        let head = ResponseHead::new(StatusCode::from_u16(599).unwrap(), Headers::new());
        assert!(encode(head, PayloadSize::Empty).starts_with("HTTP/1.1 599 \r\n"));
    }
}
