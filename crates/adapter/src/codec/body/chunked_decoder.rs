//! Decoder for request bodies sent with `Transfer-Encoding: chunked`
//! ([RFC 9112 section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1)).
//!
//! Chunk extensions and trailer fields are read and dropped. Chunk data is
//! handed out as soon as it arrives, so one wire chunk may surface as several
//! [`PayloadItem::Chunk`]s.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// first hex digit of the chunk size
    SizeStart,
    /// further hex digits of the chunk size
    Size,
    /// whitespace between size and extension or CR
    SizeLws,
    /// `;ext=value` until CR
    Extension,
    /// LF closing the size line
    SizeLf,
    /// chunk data
    Data,
    /// CR after chunk data
    DataCr,
    /// LF after chunk data
    DataLf,
    /// first byte of a trailer line, or CR of the final empty line
    TrailerStart,
    /// rest of a trailer field line
    Trailer,
    /// LF closing a trailer field line
    TrailerLf,
    /// LF closing the message
    EndLf,
    End,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::SizeStart, remaining: 0 }
    }

    fn invalid(reason: &str) -> ParseError {
        ParseError::invalid_body(format!("invalid chunked body: {reason}"))
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == State::End {
                trace!("finished reading chunked data");
                return Ok(Some(PayloadItem::Eof));
            }

            if src.is_empty() {
                return Ok(None);
            }

            if self.state == State::Data {
                let len = self.remaining.min(src.len() as u64) as usize;
                self.remaining -= len as u64;
                if self.remaining == 0 {
                    self.state = State::DataCr;
                }
                trace!(len, "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(src.split_to(len).freeze())));
            }

            let byte = src.get_u8();
            self.state = match (self.state, byte) {
                (State::SizeStart | State::Size, b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F') => {
                    let digit = (byte as char).to_digit(16).map(u64::from).unwrap_or_default();
                    self.remaining = self
                        .remaining
                        .checked_mul(16)
                        .and_then(|size| size.checked_add(digit))
                        .ok_or_else(|| Self::invalid("chunk size overflow"))?;
                    State::Size
                }
                (State::Size | State::SizeLws, b'\t' | b' ') => State::SizeLws,
                (State::Size | State::SizeLws, b';') => State::Extension,
                (State::Size | State::SizeLws | State::Extension, b'\r') => State::SizeLf,
                (State::Extension, b'\n') => return Err(Self::invalid("chunk extension contains newline")),
                (State::Extension, _) => State::Extension,
                (State::SizeLf, b'\n') if self.remaining == 0 => State::TrailerStart,
                (State::SizeLf, b'\n') => State::Data,
                (State::DataCr, b'\r') => State::DataLf,
                (State::DataLf, b'\n') => State::SizeStart,
                (State::TrailerStart, b'\r') => State::EndLf,
                (State::Trailer, b'\r') => State::TrailerLf,
                (State::TrailerStart | State::Trailer, _) => State::Trailer,
                (State::TrailerLf, b'\n') => State::TrailerStart,
                (State::EndLf, b'\n') => State::End,
                (state, _) => return Err(Self::invalid(&format!("unexpected byte {byte:#04x} in state {state:?}"))),
            };
        }
    }
}
