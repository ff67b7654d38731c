//! Postcard Studio
//!
//! HTTP backend for the festive postcard campaign: email verification,
//! photo upload, AI postcard generation and the admin dashboard.

use anyhow::Result;
use clap::Parser;
use postcard_studio::{
    config::{Environment, Settings, StorageBackend},
    server::App,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Postcard Studio
#[derive(Parser, Debug)]
#[command(name = "postcard-studio")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides HOST env var)
    #[arg(long)]
    host: Option<String>,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long)]
    log_level: Option<String>,

    /// Environment: dev, staging, prod (overrides ENVIRONMENT env var)
    #[arg(short, long)]
    env: Option<Environment>,

    /// Storage backend: dynamodb or memory (overrides STORAGE_BACKEND env var)
    #[arg(long)]
    storage: Option<StorageBackend>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration first, so the log level is known
    let mut settings = Settings::load()?;

    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(env) = args.env {
        settings.environment = env;
    }
    if let Some(storage) = args.storage {
        settings.storage_backend = storage;
    }
    settings.validate()?;

    init_tracing(&settings.log_level);

    tracing::info!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        environment = %settings.environment,
        storage = %settings.storage_backend,
        host = %settings.host,
        port = %settings.port,
        "Starting application"
    );

    let app = App::new(settings).await?;
    app.run_with_graceful_shutdown().await?;

    tracing::info!("Application shutdown complete");

    Ok(())
}

/// JSON logs to stdout, filtered by `RUST_LOG` or the configured level
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().json().with_current_span(true))
        .with(filter)
        .init();
}
