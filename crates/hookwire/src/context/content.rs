//! Typed responders built on the low-level responder.
//!
//! Each sets `Content-Type` only when the handler has not set one already.

use super::imaging::{EncodeImage, ImageFormat};
use super::responder::{parse_content_type, ContentType, ResponseContext};
use super::ResponseError;
use bytes::Bytes;
use hyper::header::HeaderValue;
use serde::Serialize;

impl ResponseContext {
    /// Respond with UTF-8 text. `None` sends an empty body.
    pub fn respond_with_text(&self, text: Option<&str>) -> Result<(), ResponseError> {
        self.respond_with_content(
            text.map(|t| Bytes::copy_from_slice(t.as_bytes()))
                .unwrap_or_default(),
            ContentType::IfAbsent(HeaderValue::from_static("text/plain")),
        )
    }

    /// Respond with an HTML document. `None` sends an empty body.
    pub fn respond_with_html(&self, html: Option<&str>) -> Result<(), ResponseError> {
        self.respond_with_content(
            html.map(|h| Bytes::copy_from_slice(h.as_bytes()))
                .unwrap_or_default(),
            ContentType::IfAbsent(HeaderValue::from_static("text/html")),
        )
    }

    /// Serialize `value` as JSON. `None` sends an empty body.
    ///
    /// A serialization failure leaves the context untouched.
    pub fn respond_with_json<T>(&self, value: Option<&T>) -> Result<(), ResponseError>
    where
        T: Serialize + ?Sized,
    {
        let body = match value {
            Some(value) => Bytes::from(serde_json::to_vec(value)?),
            None => Bytes::new(),
        };
        self.respond_with_content(
            body,
            ContentType::IfAbsent(HeaderValue::from_static("application/json")),
        )
    }

    /// Respond with an image encoded as JPEG for `.jpg`/`.jpeg` request
    /// paths and PNG otherwise. `None` sends an empty body.
    pub fn respond_with_image(&self, image: Option<&dyn EncodeImage>) -> Result<(), ResponseError> {
        let format = ImageFormat::for_path(self.request().path());
        let body = encode(image, format)?;
        self.respond_with_content(
            body,
            ContentType::IfAbsent(HeaderValue::from_static(format.mime_type())),
        )
    }

    /// Respond with an image encoded to match `mime`, which becomes the
    /// `Content-Type`.
    pub fn respond_with_image_mime(
        &self,
        image: Option<&dyn EncodeImage>,
        mime: &str,
    ) -> Result<(), ResponseError> {
        let content_type = parse_content_type(mime)?;
        let body = encode(image, ImageFormat::for_mime(mime))?;
        self.respond_with_content(body, ContentType::Force(content_type))
    }
}

fn encode(image: Option<&dyn EncodeImage>, format: ImageFormat) -> Result<Bytes, ResponseError> {
    match image {
        Some(image) => image
            .encode(format)
            .map_err(|e| ResponseError::ImageEncoding(e.to_string())),
        None => Ok(Bytes::new()),
    }
}
