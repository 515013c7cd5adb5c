//! Body framing codecs.
//!
//! Request bodies are read through [`PayloadDecoder`], which picks a
//! `Content-Length` or chunked decoder from the request head. Response bodies
//! are written through [`PayloadEncoder`], picked from the framing the
//! response head announces.

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
