//! HTTP header decoder for request heads.
//!
//! Parses the request line and header fields with `httparse`, converts them to
//! a [`RequestHeader`] and works out how the request body is framed.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header size: 8KB
//! - Only HTTP/1.0 and HTTP/1.1

use std::mem::MaybeUninit;

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Request};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;

use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of headers allowed in a request
pub const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decoder for HTTP request heads.
///
/// Yields the parsed [`RequestHeader`] together with the [`PayloadSize`]
/// derived from `Content-Length` / `Transfer-Encoding`.
#[derive(Debug)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // "GET / HTTP/1.1\r\n\r\n" is the shortest request we could accept
        if src.len() < 14 {
            return Ok(None);
        }

        let mut req = httparse::Request::new(&mut []);
        // SAFETY: an array of `MaybeUninit` needs no initialization
        let mut headers: [MaybeUninit<httparse::Header>; MAX_HEADER_NUM] = unsafe { MaybeUninit::uninit().assume_init() };

        let parsed = req.parse_with_uninit_headers(src, &mut headers).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        })?;

        let body_offset = match parsed {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => http::Version::HTTP_10,
            Some(1) => http::Version::HTTP_11,
            _ => return Err(ParseError::InvalidVersion(req.version)),
        };

        let mut builder = Request::builder()
            .method(req.method.ok_or(ParseError::InvalidMethod)?)
            .uri(req.path.ok_or(ParseError::InvalidUri)?)
            .version(version);

        if let Some(header_map) = builder.headers_mut() {
            header_map.reserve(req.headers.len());
            for header in req.headers.iter() {
                let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(ParseError::invalid_header)?;
                let value = HeaderValue::from_bytes(header.value).map_err(ParseError::invalid_header)?;
                header_map.append(name, value);
            }
        }

        let header = match builder.body(()) {
            Ok(request) => RequestHeader::from(request),
            Err(e) if e.is::<http::method::InvalidMethod>() => return Err(ParseError::InvalidMethod),
            Err(_) => return Err(ParseError::InvalidUri),
        };

        let _ = src.split_to(body_offset);
        let payload_size = parse_payload(&header)?;

        Ok(Some((header, payload_size)))
    }
}

/// Determines the request body framing according to RFC 9112 section 6.
///
/// - methods without body semantics and requests without framing headers: empty
/// - `Transfer-Encoding` ending in `chunked`: chunked
/// - `Content-Length`: fixed length
/// - both headers present: rejected
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    if !header.need_body() && te_header.is_none() && cl_header.is_none() {
        return Ok(PayloadSize::Empty);
    }

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (te_value @ Some(_), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Err(ParseError::invalid_header("transfer-encoding without trailing chunked"))
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;

            let length =
                cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

            Ok(PayloadSize::from_len(length))
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}

/// `chunked` counts only as the final transfer coding.
fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    header_value
        .and_then(|value| value.as_bytes().rsplit(|b| *b == b',').next())
        .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
