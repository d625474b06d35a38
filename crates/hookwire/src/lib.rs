// Library exports for embedding, benchmarking and testing

// ===== Interception core =====
pub mod context;
pub mod engine;
pub mod error;
pub mod pipe;
pub mod predicate;
pub mod registry;
pub mod request;

// ===== Response sources =====
pub mod handlers;
pub mod mime;
pub mod upstream;

// ===== Serving and operations =====
pub mod config;
pub mod headers;
pub mod metrics;
pub mod server;

pub use context::{
    CachePolicy, Delivery, ResponseBody, ResponseContext, ResponseError, ResponseHandle,
};
pub use engine::{Disposition, InterceptionEngine, UpstreamObserver};
pub use error::InterceptError;
pub use predicate::Predicate;
pub use registry::{HandlerId, HandlerRegistry, RequestHandler};
pub use request::InterceptedRequest;
