//! Terminal failures reported to the consumer.

use crate::upstream::TransportError;
use std::any::Any;

/// Why an interception ended without a normal response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InterceptError {
    #[error("Upstream transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
    #[error("Handler failed: {0}")]
    Handler(String),
    #[error("Response context dropped without a terminal response")]
    Abandoned,
    #[error("No async runtime available to relay the upstream request")]
    NoRuntime,
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl InterceptError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InterceptError::Transport(_) => "transport",
            InterceptError::HandlerPanicked(_) => "panic",
            InterceptError::Handler(_) => "handler",
            InterceptError::Abandoned => "abandoned",
            InterceptError::NoRuntime => "no_runtime",
        }
    }
}
