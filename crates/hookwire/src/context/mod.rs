//! Per-request response construction.
//!
//! A [`ResponseContext`] is created for each intercepted request and handed
//! to the matched handler. The consumer observes it through a
//! [`ResponseHandle`], which resolves to exactly one [`Delivery`].
//!
//! # Module Structure
//!
//! - `state` - Phases, atomic transitions and [`CachePolicy`]
//! - `responder` - The context itself: metadata, low-level responders,
//!   pipe API and cancellation
//! - `content` - Text, HTML, JSON and image responders
//! - `imaging` - The [`EncodeImage`] capability
//! - `delivery` - Consumer-side types

mod content;
mod delivery;
mod imaging;
mod responder;
mod state;

#[cfg(test)]
mod tests;

pub use delivery::{
    BodyStream, Canceller, Delivery, ResponseBody, ResponseHandle, ResponseHead, StreamError,
};
pub use imaging::{EncodeError, EncodeImage, EncodedImage, ImageFormat};
pub use responder::ResponseContext;
pub use state::{CachePolicy, Phase};

/// A responder call was rejected. The context is left unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("Invalid status code {0}")]
    InvalidStatus(u16),
    #[error("Invalid header name '{0}'")]
    InvalidHeaderName(String),
    #[error("Invalid value for header '{0}'")]
    InvalidHeaderValue(String),
    #[error("Invalid content type '{0}'")]
    InvalidContentType(String),
    #[error("Failed to serialize JSON body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to encode image: {0}")]
    ImageEncoding(String),
}
