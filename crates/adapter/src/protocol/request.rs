//! HTTP request header handling implementation.
//!
//! This module wraps the standard `http::Request<()>` and adds the queries the
//! transport needs while serving one request: HEAD detection, keep-alive,
//! expect-continue and the multipart boundary.

use http::header::{CONNECTION, CONTENT_TYPE, EXPECT};
use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

use crate::protocol::ParseError;

/// Represents an HTTP request header.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl RequestHeader {
    /// Consumes the header and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body to this header, converting it into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// HEAD responses carry headers only, never a body.
    pub fn is_head(&self) -> bool {
        *self.method() == Method::HEAD
    }

    /// Determines if this request requires a body based on its HTTP method.
    ///
    /// Returns false for methods that typically don't have bodies:
    /// GET, HEAD, DELETE, OPTIONS and CONNECT.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Whether the connection may serve another request after this one.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is present,
    /// HTTP/1.0 only keeps alive with an explicit `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let has_token = |token: &str| {
            self.headers()
                .get_all(CONNECTION)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .flat_map(|value| value.split(','))
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        };

        match self.version() {
            Version::HTTP_11 => !has_token("close"),
            _ => has_token("keep-alive"),
        }
    }

    /// Checks for `Expect: 100-continue`.
    pub fn expects_continue(&self) -> bool {
        self.headers()
            .get(EXPECT)
            .map(|value| value.as_bytes().len() >= 4 && value.as_bytes()[..4].eq_ignore_ascii_case(b"100-"))
            .unwrap_or(false)
    }

    /// Extracts the `boundary` parameter of a `multipart/*` content type.
    pub fn multipart_boundary(&self) -> Result<String, ParseError> {
        let content_type = self
            .headers()
            .get(CONTENT_TYPE)
            .ok_or_else(|| ParseError::malformed_multipart("missing content-type header"))?
            .to_str()
            .map_err(|_| ParseError::malformed_multipart("content-type is not visible ascii"))?;

        let mime: mime::Mime =
            content_type.parse().map_err(|e| ParseError::malformed_multipart(format!("invalid content-type {content_type:?}: {e}")))?;

        if mime.type_() != mime::MULTIPART {
            return Err(ParseError::malformed_multipart(format!("content-type {content_type:?} is not multipart")));
        }

        let boundary = mime
            .get_param(mime::BOUNDARY)
            .map(|boundary| boundary.as_str().trim_matches('"'))
            .ok_or_else(|| ParseError::malformed_multipart("missing boundary parameter"))?;

        // rfc2046: 1*70 characters
        if boundary.is_empty() || boundary.len() > 70 {
            return Err(ParseError::malformed_multipart(format!("invalid boundary {boundary:?}")));
        }

        Ok(boundary.to_owned())
    }
}

/// Converts request parts into a RequestHeader.
impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

/// Converts a bodyless request into a RequestHeader.
impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(builder: http::request::Builder) -> RequestHeader {
        RequestHeader::from(builder.body(()).unwrap())
    }

    #[test]
    fn keep_alive_by_version() {
        assert!(header(Request::get("/")).keep_alive());
        assert!(!header(Request::get("/").header(CONNECTION, "Close")).keep_alive());
        assert!(!header(Request::get("/").version(Version::HTTP_10)).keep_alive());
        assert!(header(Request::get("/").version(Version::HTTP_10).header(CONNECTION, "keep-alive")).keep_alive());
        assert!(!header(Request::get("/").header(CONNECTION, "upgrade, close")).keep_alive());
    }

    #[test]
    fn detects_expect_continue() {
        assert!(header(Request::post("/").header(EXPECT, "100-continue")).expects_continue());
        assert!(!header(Request::post("/")).expects_continue());
    }

    #[test]
    fn head_and_body_need() {
        let head = header(Request::head("/"));
        assert!(head.is_head());
        assert!(!head.need_body());
        assert!(header(Request::post("/")).need_body());
    }

    #[test]
    fn boundary_from_content_type() {
        let req = header(Request::post("/").header(CONTENT_TYPE, "multipart/form-data; boundary=----WebKitFormBoundary7MA4"));
        assert_eq!(req.multipart_boundary().unwrap(), "----WebKitFormBoundary7MA4");

        let quoted = header(Request::post("/").header(CONTENT_TYPE, r#"multipart/mixed; boundary="abc""#));
        assert_eq!(quoted.multipart_boundary().unwrap(), "abc");
    }

    #[test]
    fn boundary_errors() {
        let missing = header(Request::post("/"));
        assert!(matches!(missing.multipart_boundary(), Err(ParseError::MalformedMultipart { .. })));

        let json = header(Request::post("/").header(CONTENT_TYPE, "application/json"));
        assert!(matches!(json.multipart_boundary(), Err(ParseError::MalformedMultipart { .. })));

        let no_boundary = header(Request::post("/").header(CONTENT_TYPE, "multipart/form-data"));
        assert!(matches!(no_boundary.multipart_boundary(), Err(ParseError::MalformedMultipart { .. })));
    }
}
