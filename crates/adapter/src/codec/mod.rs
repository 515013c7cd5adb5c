//! Sans-IO codecs for the HTTP/1.1 wire format.
//!
//! - [`RequestDecoder`] turns the inbound byte stream into request heads and
//!   body [`PayloadItem`](crate::protocol::PayloadItem)s
//! - [`ResponseEncoder`] writes response heads and bodies with the framing the
//!   head announces
//! - [`MultipartDecoder`] splits a `multipart/*` body into parts
//!
//! All of them plug into `tokio_util::codec` and never touch IO themselves.

mod body;
mod header;
mod multipart_decoder;
mod request_decoder;
mod response_encoder;

pub use header::{MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub(crate) use header::{apply_framing, forbids_body};
pub use multipart_decoder::{MAX_PART_HEADER_BYTES, MAX_PART_HEADER_NUM, MultipartDecoder, MultipartItem};
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
