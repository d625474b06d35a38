//! Engine construction from configuration.

use super::InterceptionEngine;
use crate::config::Config;
use crate::handlers::StaticResponder;
use crate::predicate::Predicate;
use crate::registry::HandlerRegistry;
use crate::upstream::UpstreamTarget;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

impl InterceptionEngine {
    /// Build an engine and register every configured route and upstream.
    ///
    /// Routes are registered into `registry` in file order, so earlier routes
    /// take precedence over later ones.
    pub fn from_config(config: &Config, registry: Arc<HandlerRegistry>) -> anyhow::Result<Self> {
        let mime = Arc::new(config.mime.resolver());
        let engine = InterceptionEngine::new(registry)
            .with_mime(mime.as_ref().clone())
            .with_connection_pool(config.connection_pool.clone());

        for route in &config.routes {
            let predicate = Predicate::compile(&route.match_config)
                .with_context(|| format!("Invalid match in route '{}'", route.name))?;
            let responder = StaticResponder::from_route(route, Arc::clone(&mime));
            engine
                .registry()
                .register_named(route.name.clone(), predicate, responder);
        }

        for upstream in &config.upstreams {
            let predicate = Predicate::compile(&upstream.match_config).with_context(|| {
                format!("Invalid match for upstream {}", upstream.proxy_url())
            })?;
            engine
                .configure_upstream(UpstreamTarget::from(upstream), predicate, None)
                .with_context(|| format!("Failed to build upstream {}", upstream.proxy_url()))?;
        }

        info!(
            "Loaded {} routes and {} upstreams",
            config.routes.len(),
            config.upstreams.len()
        );
        Ok(engine)
    }
}
