//! Core protocol types shared by the codecs and the transports.
//!
//! - **Message handling** ([`message`]): [`Message`], [`PayloadItem`] and
//!   [`PayloadSize`] flow between the connection and the codecs
//! - **Heads**: [`RequestHeader`] for the parsed request, [`ResponseHead`] and
//!   the ordered [`Headers`] list for what is sent back
//! - **Body values** ([`body`]): [`BodyChunk`] reads and [`FileRegion`] file bodies
//! - **Multipart values** ([`multipart`]): part heads, classification decisions
//!   and the collected [`Params`]
//! - **Error handling** ([`error`]): [`HttpError`], [`ParseError`],
//!   [`SendError`] and the payload-carrying [`ChunkError`]

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHead;

mod headers;
pub use headers::Headers;

mod error;
pub use error::ChunkError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
pub use body::BodyChunk;
pub use body::FileRegion;

pub mod multipart;
pub use multipart::Multipart;
pub use multipart::Param;
pub use multipart::Params;
pub use multipart::PartHeaders;
pub use multipart::SegmentDecision;
pub use multipart::Upload;
