//! proxy-middleware server binary.
//!
//! Loads a TOML config (or runs from flags alone), builds one proxy
//! middleware instance and serves it until Ctrl+C.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use proxy_middleware::config::loader::read_config;
use proxy_middleware::config::validation::validate_config;
use proxy_middleware::error::ConfigError;
use proxy_middleware::http::server::shutdown_signal;
use proxy_middleware::observability::{logging, metrics};
use proxy_middleware::{HttpServer, ProxyConfig, ProxyMiddleware};

#[derive(Parser)]
#[command(name = "proxy-middleware")]
#[command(about = "Context-scoped reverse proxy", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream target, overrides [proxy].target
    #[arg(short, long)]
    target: Option<String>,

    /// Listen address, overrides [listener].bind_address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(target) = cli.target {
        config.proxy.target = Some(target);
    }
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!("proxy-middleware v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let proxy = ProxyMiddleware::new(config.proxy.to_context()?, config.proxy.to_options()?)?;
    let server = HttpServer::new(&config, proxy.clone());
    if proxy.options().ws {
        proxy.attach(server.hub());
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    server.run(listener, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
