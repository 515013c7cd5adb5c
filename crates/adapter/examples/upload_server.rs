//! Accepts `multipart/form-data` uploads: text fields are buffered, files are
//! streamed into the system temp directory, and a summary is sent back as a
//! chunked response.

use std::fmt::Write;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use micro_adapter::connection::HttpConnection;
use micro_adapter::handler::make_handler;
use micro_adapter::protocol::{Headers, HttpError, Param, PartHeaders, SegmentDecision};
use micro_adapter::transport::{HttpPayload, Transport};
use tokio::fs::File;
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

type Payload = HttpPayload<OwnedReadHalf, OwnedWriteHalf>;

/// Upper bound for a whole upload request body
const UPLOAD_LIMIT: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!(port = 8080, "start listening");
    let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
        Ok(tcp_listener) => tcp_listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    let handler = Arc::new(make_handler(upload));
    loop {
        let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let handler = handler.clone();
        tokio::spawn(async move {
            let (reader, writer) = tcp_stream.into_split();
            let connection = HttpConnection::new(reader, writer);
            if let Err(e) = connection.process(handler).await {
                error!(cause = %e, "connection process error");
            }
        });
    }
}

fn classify(part: &PartHeaders) -> SegmentDecision<File> {
    let Some(name) = part.name() else {
        return SegmentDecision::Skip;
    };

    match part.filename() {
        Some(filename) => {
            // keep only the last path segment of the client supplied name
            let filename = filename.rsplit(['/', '\\']).next().unwrap_or("upload");
            let path = std::env::temp_dir().join(format!("micro-adapter-{filename}"));
            match std::fs::File::create(&path) {
                Ok(file) => {
                    info!(path = %path.display(), "receiving file");
                    SegmentDecision::File(name.to_owned(), File::from_std(file))
                }
                Err(e) => {
                    warn!(cause = %e, path = %path.display(), "can't create upload file, skipping part");
                    SegmentDecision::Skip
                }
            }
        }
        None => SegmentDecision::Binary(name.to_owned()),
    }
}

async fn upload(payload: Payload) -> Result<Payload, HttpError> {
    if payload.request().method() != Method::POST {
        let headers = Headers::new().with("Content-Type", "text/plain")?;
        let body = Bytes::from_static(b"POST a multipart/form-data body\r\n");
        let (payload, ()) = payload.send_response(StatusCode::METHOD_NOT_ALLOWED, headers, body).await?;
        return Ok(payload);
    }

    let (payload, outcome) = payload.parse_multipart(UPLOAD_LIMIT, classify).await?;
    let Some(params) = outcome.into_params() else {
        let headers = Headers::new().with("Connection", "close")?;
        let (payload, ()) = payload.send_response(StatusCode::PAYLOAD_TOO_LARGE, headers, Bytes::new()).await?;
        return Ok(payload);
    };

    let headers = Headers::new().with("Content-Type", "text/plain")?;
    let mut payload = payload.begin_chunked(StatusCode::OK, headers).await?;
    for (name, param) in params {
        let line = describe(&name, &param);
        payload = payload.send_chunk(Bytes::from(line)).await?.0;
    }
    Ok(payload.end_chunked().await?)
}

fn describe(name: &str, param: &Param<File>) -> String {
    let mut line = String::new();
    match param {
        Param::Value(bytes) => {
            let _ = writeln!(line, "{name} = {:?}", String::from_utf8_lossy(bytes));
        }
        Param::File(upload) => {
            let _ = writeln!(line, "{name} = file {:?}, {} bytes", upload.filename().unwrap_or_default(), upload.size());
        }
        Param::List(items) => {
            for item in items {
                line.push_str(&describe(&format!("{name}[]"), item));
            }
        }
    }
    line
}
