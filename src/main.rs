//! Static file server with referrer-based HTTP/2 push.
//!
//! ```text
//!   client ──h2c / HTTP/1.1──▶ listener ──▶ PushLayer ──▶ ServeDir
//!                                              │
//!                                              └── learned pushes (HTTP/2 only)
//! ```

use std::path::PathBuf;

use clap::Parser;

use referrer_push::config::{load_config, ServerConfig};
use referrer_push::net::Listener;
use referrer_push::observability::{logging, metrics};
use referrer_push::{PushServer, Shutdown};

#[derive(Parser)]
#[command(name = "referrer-push")]
#[command(about = "Static file server that learns and pushes page assets", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to serve, overriding the configuration.
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Bind address, overriding the configuration.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(root) = cli.root {
        config.static_files.root = root.display().to_string();
    }
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_tracing(&config.observability.log_level);
    tracing::info!("referrer-push v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        max_associated_resources = config.push.max_associated_resources,
        association_window_ms = config.push.association_window_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    let server = PushServer::new(config);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
