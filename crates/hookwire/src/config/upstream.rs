//! Upstream proxy and connection pool configuration.

use super::protocol::Protocol;
use super::routes::MatchConfig;
use crate::predicate::Predicate;
use serde::{Deserialize, Serialize};

/// Requests matching `match` are relayed through the proxy at `host:port`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
    /// Protocol spoken to the proxy (default: http)
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(rename = "match")]
    pub match_config: MatchConfig,
    /// Whole-request timeout; unset means no timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl UpstreamConfig {
    /// Proxy URL handed to the HTTP client.
    pub fn proxy_url(&self) -> String {
        format!("{}://{}:{}", self.protocol.as_str(), self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("upstream host must not be empty".to_string());
        }
        if self.port == 0 {
            return Err(format!("upstream '{}' has port 0", self.host));
        }
        Predicate::compile(&self.match_config)
            .map_err(|e| format!("invalid match for upstream '{}': {}", self.proxy_url(), e))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_timeout_secs: default_keepalive_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_keepalive_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}
