//! Connection lifecycle.
//!
//! [`HttpConnection`] owns the framed socket halves between requests. Each
//! request head turns it into an [`HttpPayload`](crate::transport::HttpPayload)
//! and finishing the payload turns it back, which keeps the one-exchange-at-a-
//! time rule of HTTP/1.1 in the types.

mod http_connection;

pub use http_connection::HttpConnection;
