//! Upstream transport: performs real fetches on the engine's behalf.
//!
//! The engine only depends on [`UpstreamTransport`]; [`ReqwestUpstream`]
//! relays requests through an HTTP proxy at a configured `host:port`.

mod client;

pub use client::ReqwestUpstream;

use crate::config::{Protocol, UpstreamConfig};
use crate::request::InterceptedRequest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use hyper::{HeaderMap, StatusCode};
use std::fmt;
use std::time::Duration;

/// Errors from an upstream fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to build client for upstream {0}: {1}")]
    Client(String, String),
    #[error("Upstream request failed: {0}")]
    Request(String),
    #[error("Upstream request timed out")]
    Timeout,
    #[error("Upstream body failed: {0}")]
    Body(String),
}

impl TransportError {
    /// Classify a `reqwest` error.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Address of a forwarding proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub timeout: Option<Duration>,
}

impl UpstreamTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: Protocol::Http,
            timeout: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn proxy_url(&self) -> String {
        format!("{}://{}:{}", self.protocol.as_str(), self.host, self.port)
    }
}

impl From<&UpstreamConfig> for UpstreamTarget {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            protocol: config.protocol,
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.proxy_url())
    }
}

/// Body chunks of an upstream response.
pub type UpstreamBody = BoxStream<'static, Result<Bytes, TransportError>>;

/// Response head plus a streamed body.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    /// Response with a body that arrives in the given chunks.
    pub fn from_chunks(status: StatusCode, headers: HeaderMap, chunks: Vec<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))),
        }
    }
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Something that can fetch a request over the network.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<UpstreamResponse, TransportError>;

    /// Short description used in logs.
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_config() {
        let config: UpstreamConfig = serde_yaml::from_str(
            r#"
host: proxy.test
port: 8443
protocol: https
match: { scheme: https }
timeout_secs: 3
"#,
        )
        .unwrap();
        let target = UpstreamTarget::from(&config);
        assert_eq!(target.proxy_url(), "https://proxy.test:8443");
        assert_eq!(target.timeout, Some(Duration::from_secs(3)));
        assert_eq!(target.to_string(), config.proxy_url());
    }

    #[tokio::test]
    async fn test_response_from_chunks() {
        use futures::StreamExt;

        let response = UpstreamResponse::from_chunks(
            StatusCode::OK,
            HeaderMap::new(),
            vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
        );
        let chunks: Vec<_> = response.body.collect().await;
        assert_eq!(chunks.len(), 2);
    }
}
