//! Configuration types for hookwire.

mod listen;
mod protocol;
mod routes;
mod upstream;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mime::{MimeResolver, DEFAULT_MIME_TYPE};

pub use listen::{FallbackMode, ListenConfig, MetricsConfig};
pub use protocol::Protocol;
pub use routes::{MatchConfig, RespondConfig, RouteConfig};
pub use upstream::{ConnectionPoolConfig, UpstreamConfig};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: ListenConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mime: MimeConfig,

    /// Routes answered locally, evaluated in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,

    /// Requests relayed through upstream proxies, evaluated after routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<UpstreamConfig>,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

/// Content-type inference settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MimeConfig {
    #[serde(default = "default_mime")]
    pub default: String,
    /// Extension (without dot) to content type
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub overrides: HashMap<String, String>,
}

fn default_mime() -> String {
    DEFAULT_MIME_TYPE.to_string()
}

impl Default for MimeConfig {
    fn default() -> Self {
        Self {
            default: default_mime(),
            overrides: HashMap::new(),
        }
    }
}

impl MimeConfig {
    pub fn resolver(&self) -> MimeResolver {
        self.overrides.iter().fold(
            MimeResolver::new().with_default(self.default.clone()),
            |resolver, (ext, mime)| resolver.with_override(ext, mime.clone()),
        )
    }
}

impl Config {
    /// Load a YAML file, or JSON when the extension is `.json`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.listen.port == 0 {
            anyhow::bail!("'listen.port' must not be 0");
        }
        if self.listen.host.trim().is_empty() {
            anyhow::bail!("'listen.host' must not be empty");
        }
        if self.metrics.enabled() && self.metrics.port == self.listen.port {
            anyhow::bail!(
                "'metrics.port' ({}) collides with 'listen.port'",
                self.metrics.port
            );
        }

        self.mime
            .default
            .parse::<hyper::header::HeaderValue>()
            .map_err(|_| anyhow::anyhow!("Invalid default MIME type '{}'", self.mime.default))?;

        let mut names = HashSet::new();
        for route in &self.routes {
            route.validate()?;
            if !names.insert(route.name.as_str()) {
                anyhow::bail!("Duplicate route name '{}'", route.name);
            }
        }

        for upstream in &self.upstreams {
            upstream.validate().map_err(|e| anyhow::anyhow!(e))?;
        }

        Ok(())
    }
}
