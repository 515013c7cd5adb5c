//! Framing decoder for `multipart/*` bodies
//! ([RFC 2046 section 5.1](https://www.rfc-editor.org/rfc/rfc2046#section-5.1)).
//!
//! The decoder only splits the body: it yields each part head as
//! [`MultipartItem::Part`], the part body as any number of
//! [`MultipartItem::Data`] items, [`MultipartItem::PartEnd`] at the next
//! delimiter and [`MultipartItem::End`] at the closing delimiter. Body bytes
//! are handed out as soon as they cannot be the start of a delimiter, so the
//! buffer never holds more than one read plus a part header block.

use bytes::{Buf, Bytes, BytesMut};
use http::HeaderValue;
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{Headers, ParseError, PartHeaders};

/// Maximum number of headers in one part head
pub const MAX_PART_HEADER_NUM: usize = 32;

/// Maximum size in bytes of one part head
pub const MAX_PART_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug)]
pub enum MultipartItem {
    Part(PartHeaders),
    Data(Bytes),
    PartEnd,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// nothing consumed yet; the first delimiter may come without CRLF
    Start,
    /// discarding preamble up to the first delimiter
    Preamble,
    /// after a delimiter: `--` closes the body, CRLF opens a part head
    Boundary,
    /// part head up to the empty line
    Headers,
    /// part body up to the next delimiter
    Body,
    End,
}

#[derive(Debug)]
pub struct MultipartDecoder {
    state: State,
    /// `\r\n--boundary`
    delimiter: Bytes,
}

impl MultipartDecoder {
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Self { state: State::Start, delimiter: Bytes::from(delimiter) }
    }

    pub fn is_end(&self) -> bool {
        self.state == State::End
    }

    /// The delimiter without its leading CRLF.
    fn dash_boundary(&self) -> &[u8] {
        &self.delimiter[2..]
    }

    fn decode_start(&mut self, src: &mut BytesMut) -> Option<()> {
        let dash_boundary = self.dash_boundary();
        let n = src.len().min(dash_boundary.len());
        if src[..n] != dash_boundary[..n] {
            self.state = State::Preamble;
            return Some(());
        }
        if n < dash_boundary.len() {
            return None;
        }

        src.advance(n);
        self.state = State::Boundary;
        Some(())
    }

    fn decode_preamble(&mut self, src: &mut BytesMut) -> Option<()> {
        match find(src, &self.delimiter) {
            Some(i) => {
                trace!(preamble_size = i, "skipped multipart preamble");
                src.advance(i + self.delimiter.len());
                self.state = State::Boundary;
                Some(())
            }
            None => {
                let skip = safe_len(src, &self.delimiter);
                src.advance(skip);
                None
            }
        }
    }

    fn decode_boundary(&mut self, src: &mut BytesMut) -> Result<Option<MultipartItem>, ParseError> {
        // transport padding after the delimiter
        let padding = src.iter().take_while(|b| matches!(b, b' ' | b'\t')).count();
        src.advance(padding);

        if src.len() < 2 {
            return Ok(None);
        }

        match &src[..2] {
            b"--" => {
                trace!("reached closing multipart delimiter");
                self.state = State::End;
                Ok(Some(MultipartItem::End))
            }
            b"\r\n" => {
                src.advance(2);
                self.state = State::Headers;
                Ok(None)
            }
            _ => Err(ParseError::malformed_multipart("unexpected bytes after boundary delimiter")),
        }
    }

    fn decode_headers(&mut self, src: &mut BytesMut) -> Result<Option<MultipartItem>, ParseError> {
        // a part without any header field
        if src.starts_with(b"\r\n") {
            src.advance(2);
            self.state = State::Body;
            return Ok(Some(MultipartItem::Part(PartHeaders::new(Headers::new()))));
        }

        let Some(end) = find(src, b"\r\n\r\n") else {
            ensure!(src.len() <= MAX_PART_HEADER_BYTES, ParseError::malformed_multipart("part header block too large"));
            return Ok(None);
        };
        ensure!(end + 4 <= MAX_PART_HEADER_BYTES, ParseError::malformed_multipart("part header block too large"));

        let mut parsed = [httparse::EMPTY_HEADER; MAX_PART_HEADER_NUM];
        let headers = match httparse::parse_headers(&src[..end + 4], &mut parsed) {
            Ok(Status::Complete((_, parsed))) => {
                let mut headers = Headers::with_capacity(parsed.len());
                for header in parsed.iter() {
                    let value = HeaderValue::from_bytes(header.value)
                        .map_err(|_| ParseError::malformed_multipart(format!("invalid value for part header {:?}", header.name)))?;
                    headers.push_unchecked(header.name.to_owned(), value);
                }
                headers
            }
            Ok(Status::Partial) => return Err(ParseError::malformed_multipart("incomplete part header block")),
            Err(httparse::Error::TooManyHeaders) => {
                return Err(ParseError::malformed_multipart(format!("more than {MAX_PART_HEADER_NUM} part headers")));
            }
            Err(e) => return Err(ParseError::malformed_multipart(format!("invalid part header: {e}"))),
        };

        src.advance(end + 4);
        self.state = State::Body;
        Ok(Some(MultipartItem::Part(PartHeaders::new(headers))))
    }

    fn decode_body(&mut self, src: &mut BytesMut) -> Option<MultipartItem> {
        match find(src, &self.delimiter) {
            Some(0) => {
                src.advance(self.delimiter.len());
                self.state = State::Boundary;
                Some(MultipartItem::PartEnd)
            }
            Some(i) => Some(MultipartItem::Data(src.split_to(i).freeze())),
            None => match safe_len(src, &self.delimiter) {
                0 => None,
                len => Some(MultipartItem::Data(src.split_to(len).freeze())),
            },
        }
    }
}

impl Decoder for MultipartDecoder {
    type Item = MultipartItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.is_empty() && self.state != State::End {
                return Ok(None);
            }

            let progressed = match self.state {
                State::Start => self.decode_start(src),
                State::Preamble => self.decode_preamble(src),
                State::Boundary => match self.decode_boundary(src)? {
                    Some(item) => return Ok(Some(item)),
                    None if self.state == State::Headers => Some(()),
                    None => None,
                },
                State::Headers => return self.decode_headers(src),
                State::Body => return Ok(self.decode_body(src)),
                State::End => return Ok(Some(MultipartItem::End)),
            };

            if progressed.is_none() {
                return Ok(None);
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }

        match self.state {
            // an empty body holds no parts
            State::Start if buf.is_empty() => {
                self.state = State::End;
                Ok(Some(MultipartItem::End))
            }
            State::Start | State::Preamble => Err(ParseError::malformed_multipart("body ended before the first delimiter")),
            _ => Err(ParseError::malformed_multipart("body ended before the closing delimiter")),
        }
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let (&first, rest) = needle.split_first()?;
    let mut offset = 0;
    while let Some(i) = haystack[offset..].iter().position(|&b| b == first) {
        let start = offset + i;
        let candidate = &haystack[start + 1..];
        if candidate.len() < rest.len() {
            return None;
        }
        if candidate.starts_with(rest) {
            return Some(start);
        }
        offset = start + 1;
    }
    None
}

/// Number of leading bytes that cannot belong to a delimiter, given that the
/// delimiter does not occur in `buf` as a whole.
fn safe_len(buf: &[u8], delimiter: &[u8]) -> usize {
    let keep_from = buf.len().saturating_sub(delimiter.len() - 1);
    (keep_from..buf.len()).find(|&i| delimiter.starts_with(&buf[i..])).unwrap_or(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut MultipartDecoder, body: &[u8], read_size: usize) -> Result<Vec<MultipartItem>, ParseError> {
        let mut items = Vec::new();
        let mut buf = BytesMut::new();
        for chunk in body.chunks(read_size) {
            buf.extend_from_slice(chunk);
            while let Some(item) = decoder.decode(&mut buf)? {
                let end = matches!(item, MultipartItem::End);
                items.push(item);
                if end {
                    return Ok(items);
                }
            }
        }
        while let Some(item) = decoder.decode_eof(&mut buf)? {
            let end = matches!(item, MultipartItem::End);
            items.push(item);
            if end {
                break;
            }
        }
        Ok(items)
    }

    /// Collapses the items into `(part name, body)` pairs.
    fn parts(items: Vec<MultipartItem>) -> Vec<(Option<String>, Vec<u8>)> {
        let mut parts = Vec::new();
        for item in items {
            match item {
                MultipartItem::Part(headers) => parts.push((headers.name().map(str::to_owned), Vec::new())),
                MultipartItem::Data(data) => parts.last_mut().unwrap().1.extend_from_slice(&data),
                MultipartItem::PartEnd | MultipartItem::End => {}
            }
        }
        parts
    }

    const BODY: &[u8] = b"preamble\r\n--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nfirst\r\n\
        --XyZ\r\nContent-Disposition: form-data; name=\"b\"; filename=\"b.txt\"\r\nContent-Type: text/plain\r\n\r\n\
        line one\r\n-- not a delimiter\r\n--XyZ--\r\nepilogue";

    #[test]
    fn splits_parts_for_any_read_size() {
        for read_size in [1, 2, 3, 7, 16, BODY.len()] {
            let items = decode_all(&mut MultipartDecoder::new("XyZ"), BODY, read_size).unwrap();
            assert!(matches!(items.last(), Some(MultipartItem::End)));
            assert_eq!(
                parts(items),
                vec![(Some("a".to_owned()), b"first".to_vec()), (Some("b".to_owned()), b"line one\r\n-- not a delimiter".to_vec())],
                "read size {read_size}"
            );
        }
    }

    #[test]
    fn part_head_fields() {
        let items = decode_all(&mut MultipartDecoder::new("XyZ"), BODY, BODY.len()).unwrap();
        let heads: Vec<_> = items
            .into_iter()
            .filter_map(|item| match item {
                MultipartItem::Part(headers) => Some(headers),
                _ => None,
            })
            .collect();

        assert_eq!(heads.len(), 2);
        assert!(!heads[0].is_file());
        assert_eq!(heads[1].filename(), Some("b.txt"));
        assert_eq!(heads[1].content_type(), Some("text/plain"));
    }

    #[test]
    fn empty_body_and_bare_close() {
        assert!(matches!(decode_all(&mut MultipartDecoder::new("b"), b"", 4).unwrap()[..], [MultipartItem::End]));
        assert!(matches!(decode_all(&mut MultipartDecoder::new("b"), b"--b--", 4).unwrap()[..], [MultipartItem::End]));
    }

    #[test]
    fn part_without_headers() {
        let items = decode_all(&mut MultipartDecoder::new("b"), b"--b\r\n\r\nraw\r\n--b--", 64).unwrap();
        assert_eq!(parts(items), vec![(None, b"raw".to_vec())]);
    }

    #[test]
    fn truncated_body() {
        let err = decode_all(&mut MultipartDecoder::new("b"), b"--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nabc", 64);
        assert!(matches!(err, Err(ParseError::MalformedMultipart { .. })));
    }

    #[test]
    fn bad_bytes_after_delimiter() {
        let err = decode_all(&mut MultipartDecoder::new("b"), b"--b!!\r\n\r\n", 64);
        assert!(matches!(err, Err(ParseError::MalformedMultipart { .. })));
    }

    #[test]
    fn oversized_part_head() {
        let body = format!("--b\r\nX-Big: {}\r\n\r\n", "a".repeat(MAX_PART_HEADER_BYTES));
        let err = decode_all(&mut MultipartDecoder::new("b"), body.as_bytes(), 512);
        assert!(matches!(err, Err(ParseError::MalformedMultipart { .. })));
    }

    #[test]
    fn find_and_safe_len() {
        assert_eq!(find(b"abc\r\n--b", b"\r\n--b"), Some(3));
        assert_eq!(find(b"abc\r\n--", b"\r\n--b"), None);
        assert_eq!(safe_len(b"abc\r\n--", b"\r\n--b"), 3);
        assert_eq!(safe_len(b"abcdef", b"\r\n--b"), 6);
        assert_eq!(safe_len(b"abc\r", b"\r\n--b"), 3);
    }
}
