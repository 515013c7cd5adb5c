//! An adapter between HTTP application code and the transport that carries
//! each request/response exchange.
//!
//! The application receives a transport value for every request and drives
//! the [`transport::Transport`] contract with it:
//!
//! - deliver a response as an in-memory body, a file region or a chunked stream
//! - read the request body in bounded increments
//! - parse `multipart/form-data` bodies part by part, deciding per part whether
//!   to buffer it, stream it into a caller supplied writer or skip it
//!
//! Every operation consumes the transport value and hands it back, so a
//! request can never be answered twice through a stale handle.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::StatusCode;
//! use micro_adapter::connection::HttpConnection;
//! use micro_adapter::handler::make_handler;
//! use micro_adapter::protocol::{Headers, HttpError};
//! use micro_adapter::transport::{HttpPayload, Transport};
//! use tokio::net::TcpListener;
//! use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
//! use tracing::{error, info, warn};
//!
//! #[tokio::main]
//! async fn main() {
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             let handler = make_handler(|payload: HttpPayload<OwnedReadHalf, OwnedWriteHalf>| async move {
//!                 let body = Bytes::from_static(b"Hello World!\r\n");
//!                 let (payload, ()) = payload.send_response(StatusCode::OK, Headers::new(), body).await?;
//!                 Ok::<_, HttpError>(payload)
//!             });
//!             match HttpConnection::new(reader, writer).process(Arc::new(handler)).await {
//!                 Ok(_) => info!("finished process, connection shutdown"),
//!                 Err(e) => error!("service has error, cause {}, connection shutdown", e),
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`transport`]: the contract and its production and in-memory implementations
//! - [`connection`]: connection lifecycle and the serve loop
//! - [`handler`]: request handler trait and [`handler::make_handler`]
//! - [`protocol`]: heads, headers, body and multipart values, errors
//! - [`codec`]: sans-IO request, response and multipart codecs
//!
//! # Limitations
//!
//! - HTTP/1.x only, no TLS
//! - Maximum request head size: 8KB, at most 64 headers
//! - Maximum multipart part head size: 8KB, at most 32 headers

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod transport;

mod utils;
pub(crate) use utils::ensure;
