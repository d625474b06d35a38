//! `reqwest`-backed upstream transport.

use super::{TransportError, UpstreamResponse, UpstreamTarget, UpstreamTransport};
use crate::config::ConnectionPoolConfig;
use crate::headers::strip_hop_by_hop;
use crate::request::InterceptedRequest;
use async_trait::async_trait;
use futures::TryStreamExt;
use hyper::header::HOST;
use std::time::Duration;
use tracing::{debug, info};

/// Fetches requests through an HTTP proxy, or directly when no proxy is set.
#[derive(Debug, Clone)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
    target: Option<UpstreamTarget>,
}

impl ReqwestUpstream {
    /// Relay through the proxy described by `target`.
    pub fn new(target: UpstreamTarget, pool: &ConnectionPoolConfig) -> Result<Self, TransportError> {
        let proxy = reqwest::Proxy::all(target.proxy_url())
            .map_err(|e| TransportError::Client(target.proxy_url(), e.to_string()))?;
        let mut builder = client_builder(pool).proxy(proxy);
        if let Some(timeout) = target.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Client(target.proxy_url(), e.to_string()))?;

        info!(
            "Upstream proxy configured: {} (max_idle={}, idle_timeout={}s)",
            target, pool.max_idle_per_host, pool.idle_timeout_secs
        );
        Ok(Self {
            client,
            target: Some(target),
        })
    }

    /// Fetch from the request's own origin.
    pub fn direct(pool: &ConnectionPoolConfig) -> Result<Self, TransportError> {
        let client = client_builder(pool)
            .no_proxy()
            .build()
            .map_err(|e| TransportError::Client("direct".to_string(), e.to_string()))?;
        Ok(Self {
            client,
            target: None,
        })
    }

    pub fn target(&self) -> Option<&UpstreamTarget> {
        self.target.as_ref()
    }
}

fn client_builder(pool: &ConnectionPoolConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .tcp_keepalive(Duration::from_secs(pool.keepalive_timeout_secs))
        .connect_timeout(Duration::from_secs(pool.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
}

#[async_trait]
impl UpstreamTransport for ReqwestUpstream {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<UpstreamResponse, TransportError> {
        let mut headers = request.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);

        let mut builder = self
            .client
            .request(request.method().clone(), request.absolute_url())
            .headers(headers);
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.clone());
        }

        debug!(
            "Fetching {} {} via {}",
            request.method(),
            request.absolute_url(),
            self.describe()
        );
        let response = builder.send().await.map_err(TransportError::from_reqwest)?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes_stream().map_err(TransportError::from_reqwest);

        Ok(UpstreamResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }

    fn describe(&self) -> String {
        match &self.target {
            Some(target) => target.proxy_url(),
            None => "direct".to_string(),
        }
    }
}
