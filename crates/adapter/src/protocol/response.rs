//! HTTP response head as handed to the response encoder.

use http::StatusCode;

use crate::protocol::Headers;

/// Status line and headers of a response, before any body frame.
///
/// `omit_body` is set for responses to HEAD requests: the head still announces
/// the body framing, but the encoder drops every payload item.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: StatusCode,
    headers: Headers,
    omit_body: bool,
}

impl ResponseHead {
    pub fn new(status: StatusCode, headers: Headers) -> Self {
        Self { status, headers, omit_body: false }
    }

    pub fn omit_body(mut self, omit: bool) -> Self {
        self.omit_body = omit;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn is_body_omitted(&self) -> bool {
        self.omit_body
    }
}
