//! Request head decoding and response head encoding.
//!
//! - [`HeaderDecoder`] parses a request line and header block with `httparse`
//!   and derives the body framing.
//! - [`HeaderEncoder`] writes a status line and the ordered response headers,
//!   adding the framing header for the body that follows.

mod header_decoder;
mod header_encoder;

pub use header_decoder::{HeaderDecoder, MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub use header_encoder::HeaderEncoder;
pub(crate) use header_encoder::{apply_framing, forbids_body};
