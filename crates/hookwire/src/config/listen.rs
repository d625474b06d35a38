//! Listener and metrics configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    pub port: u16,
    /// What to do with requests no route or upstream claims
    #[serde(default)]
    pub fallback: FallbackMode,
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}

impl ListenConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Handling of requests that are not intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackMode {
    /// Answer 404
    #[default]
    NotFound,
    /// Forward the request to its origin unchanged
    Passthrough,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Port for the Prometheus endpoint (0 disables it)
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl MetricsConfig {
    pub fn enabled(&self) -> bool {
        self.port != 0
    }
}
