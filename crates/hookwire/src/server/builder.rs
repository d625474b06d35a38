use crate::context::StreamError;
use crate::headers::{HookwireHeadersExt, X_HOOKWIRE_SOURCE};
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::http::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Response, StatusCode};
use std::convert::Infallible;
use std::str::FromStr;

/// Body type of every response the server writes.
pub type HookwireBody = UnsyncBoxBody<Bytes, StreamError>;

pub(crate) fn full_body(bytes: Bytes) -> HookwireBody {
    Full::new(bytes)
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

/// Builds plain-text responses the server produces on its own.
pub struct SimpleResponseBuilder {
    status: StatusCode,
    body: Option<String>,
    headers: HeaderMap,
}

impl SimpleResponseBuilder {
    pub fn new(status_code: StatusCode) -> Self {
        SimpleResponseBuilder {
            status: status_code,
            body: None,
            headers: Default::default(),
        }
    }

    /// Plain-text body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Tag the response with its `x-hookwire-source`.
    pub fn source(mut self, source: &HeaderValue) -> Self {
        self.headers.insert(X_HOOKWIRE_SOURCE.clone(), source.clone());
        self
    }

    pub fn build(self) -> Response<HookwireBody> {
        let has_body = self.body.is_some();
        let payload = self.body.map(Bytes::from).unwrap_or_default();
        let mut response = Response::new(full_body(payload));
        *response.status_mut() = self.status;
        if has_body {
            response.set_header(&CONTENT_TYPE, &HeaderValue::from_static("text/plain"));
        }
        response.headers_mut().extend(self.headers);
        response
    }
}
