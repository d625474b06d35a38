use clap::Parser;
use hookwire::config::Config;
use hookwire::registry::HandlerRegistry;
use hookwire::server::{self, InterceptServer};
use hookwire::InterceptionEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hookwire")]
#[command(author, version, about = "Serve configured interception routes over HTTP")]
struct Args {
    /// Configuration file (YAML, or JSON with a .json extension)
    #[arg(short, long, env = "HOOKWIRE_CONFIG")]
    config: PathBuf,

    /// Override the listen port from the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "hookwire=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.as_str().into()),
        )
        .init();

    let mut config = Config::from_file(&args.config)?;
    if let Some(port) = args.port {
        config.listen.port = port;
        config.validate()?;
    }
    info!("Loaded configuration from {}", args.config.display());

    let engine = InterceptionEngine::from_config(&config, Arc::new(HandlerRegistry::new()))?;
    let server = Arc::new(
        InterceptServer::new(Arc::new(engine))
            .with_fallback(config.listen.fallback, &config.connection_pool)?,
    );

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            let _ = shutdown.send(());
        }
    });

    let metrics_addr = config
        .metrics
        .enabled()
        .then(|| format!("{}:{}", config.listen.host, config.metrics.port));
    server::run(server, &config.listen.bind_address(), metrics_addr.as_deref()).await
}
