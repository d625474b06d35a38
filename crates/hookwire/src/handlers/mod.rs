//! Handlers built from configured routes.

mod assets;

use crate::config::{RespondConfig, RouteConfig};
use crate::context::{CachePolicy, ResponseContext};
use crate::error::InterceptError;
use crate::mime::MimeResolver;
use crate::registry::RequestHandler;
use crate::request::InterceptedRequest;
use assets::AssetPath;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Body produced by a [`StaticResponder`].
#[derive(Debug, Clone)]
pub enum ResponseSource {
    Empty,
    Text(String),
    Html(String),
    Json(Arc<serde_json::Value>),
    Assets {
        root: PathBuf,
        strip_prefix: Option<String>,
    },
}

/// Answers requests with a fixed status, headers and body source.
#[derive(Debug, Clone)]
pub struct StaticResponder {
    name: String,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    cache_policy: CachePolicy,
    delay: Option<Duration>,
    source: ResponseSource,
    mime: Arc<MimeResolver>,
}

impl StaticResponder {
    pub fn new(name: impl Into<String>, source: ResponseSource) -> Self {
        Self {
            name: name.into(),
            status: None,
            headers: Vec::new(),
            cache_policy: CachePolicy::default(),
            delay: None,
            source,
            mime: Arc::new(MimeResolver::default()),
        }
    }

    /// Build from a validated route.
    pub fn from_route(route: &RouteConfig, mime: Arc<MimeResolver>) -> Self {
        let source = match &route.respond {
            None => ResponseSource::Empty,
            Some(RespondConfig::Text { text }) => ResponseSource::Text(text.clone()),
            Some(RespondConfig::Html { html }) => ResponseSource::Html(html.clone()),
            Some(RespondConfig::Json { json }) => ResponseSource::Json(Arc::new(json.clone())),
            Some(RespondConfig::Assets {
                assets,
                strip_prefix,
            }) => ResponseSource::Assets {
                root: assets.clone(),
                strip_prefix: strip_prefix.clone(),
            },
        };

        let mut headers: Vec<_> = route
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.sort();

        Self {
            name: route.name.clone(),
            status: route.status,
            headers,
            cache_policy: route.cache_policy,
            delay: (route.delay_ms > 0).then(|| Duration::from_millis(route.delay_ms)),
            source,
            mime,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn needs_task(&self) -> bool {
        self.delay.is_some() || matches!(self.source, ResponseSource::Assets { .. })
    }

    fn prepare(&self, context: &ResponseContext) -> bool {
        let applied = self
            .status
            .map_or(Ok(()), |status| context.set_status(status))
            .and_then(|_| context.set_headers(self.headers.iter().map(|(k, v)| (k, v))));
        if let Err(e) = applied {
            warn!("Route '{}' has invalid response metadata: {}", self.name, e);
            context.pipe_error(InterceptError::Handler(e.to_string()));
            return false;
        }
        context.set_cache_policy(self.cache_policy);
        true
    }

    fn respond_inline(&self, context: &ResponseContext) {
        let result = match &self.source {
            ResponseSource::Empty => context.respond_with_data(None, None),
            ResponseSource::Text(text) => context.respond_with_text(Some(text)),
            ResponseSource::Html(html) => context.respond_with_html(Some(html)),
            ResponseSource::Json(value) => context.respond_with_json(Some(value.as_ref())),
            ResponseSource::Assets { .. } => Ok(()),
        };
        if let Err(e) = result {
            context.pipe_error(InterceptError::Handler(e.to_string()));
        }
    }

    async fn respond_with_asset(
        &self,
        context: &ResponseContext,
        root: &std::path::Path,
        strip_prefix: Option<&str>,
    ) {
        let request = context.request();
        let file = match assets::resolve(root, request.path(), strip_prefix) {
            AssetPath::File(file) => file,
            AssetPath::Forbidden => {
                warn!("Route '{}' refused path {}", self.name, request.path());
                let _ = context.respond_with_status_code(403, Some("Forbidden"));
                return;
            }
        };

        match tokio::fs::read(&file).await {
            Ok(bytes) => {
                let has_content_type = self
                    .headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
                let mime = (!has_content_type).then(|| self.mime.guess(&file.to_string_lossy()));
                if let Err(e) = context.respond_with_data(Some(Bytes::from(bytes)), mime.as_deref()) {
                    context.pipe_error(InterceptError::Handler(e.to_string()));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Route '{}': {} not found", self.name, file.display());
                let _ = context.respond_with_status_code(404, Some("Not Found"));
            }
            Err(e) => {
                warn!("Route '{}' failed to read {}: {}", self.name, file.display(), e);
                let _ = context.respond_with_status_code(500, Some("Internal Server Error"));
            }
        }
    }

    async fn respond_later(self: Arc<Self>, context: ResponseContext) {
        if let Some(delay) = self.delay {
            let stop = Arc::new(Notify::new());
            let notify = Arc::clone(&stop);
            context.handle_stop_loading_request(move || notify.notify_one());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.notified() => {
                    debug!("Route '{}' cancelled during delay", self.name);
                    return;
                }
            }
        }

        match &self.source {
            ResponseSource::Assets { root, strip_prefix } => {
                self.respond_with_asset(&context, root, strip_prefix.as_deref())
                    .await
            }
            _ => self.respond_inline(&context),
        }
    }
}

impl RequestHandler for StaticResponder {
    fn handle(&self, _request: Arc<InterceptedRequest>, context: ResponseContext) {
        if !self.prepare(&context) {
            return;
        }
        if !self.needs_task() {
            self.respond_inline(&context);
            return;
        }

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(Arc::new(self.clone()).respond_later(context));
            }
            Err(_) => context.pipe_error(InterceptError::NoRuntime),
        }
    }
}
