//! Configured interception routes.

use crate::context::CachePolicy;
use crate::predicate::Predicate;
use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A `match` block. Compiled into a [`Predicate`] at load time.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MatchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_regex: Option<String>,
}

/// A route answered locally.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    pub name: String,
    #[serde(rename = "match")]
    pub match_config: MatchConfig,
    /// Body source. Without one the route answers with `status` and no body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respond: Option<RespondConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Delay before responding; the request may be cancelled meanwhile
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub cache_policy: CachePolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RespondConfig {
    /// Serve files from a directory, keyed by the request path
    Assets {
        assets: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strip_prefix: Option<String>,
    },
    Text {
        text: String,
    },
    Html {
        html: String,
    },
    Json {
        json: serde_json::Value,
    },
}

impl RouteConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Route name must not be empty");
        }

        Predicate::compile(&self.match_config)
            .map_err(|e| anyhow::anyhow!("Invalid match in route '{}': {}", self.name, e))?;

        if let Some(status) = self.status {
            StatusCode::from_u16(status).map_err(|_| {
                anyhow::anyhow!("Invalid status code {} in route '{}'", status, self.name)
            })?;
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                anyhow::anyhow!("Invalid header name '{}' in route '{}'", name, self.name)
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                anyhow::anyhow!("Invalid value for header '{}' in route '{}'", name, self.name)
            })?;
        }

        if let Some(RespondConfig::Assets { assets, .. }) = &self.respond {
            if !assets.is_dir() {
                anyhow::bail!(
                    "Asset directory '{}' for route '{}' does not exist",
                    assets.display(),
                    self.name
                );
            }
        }

        Ok(())
    }
}
