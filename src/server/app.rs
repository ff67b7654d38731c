//! Application server
//!
//! Binds the listener and serves the router until SIGINT/SIGTERM.

use crate::{
    config::Settings,
    server::{routes, state::AppState},
};
use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use tokio::signal;

/// Main application struct
pub struct App {
    addr: String,
    state: AppState,
}

impl App {
    /// Initialize storage, vendor clients and services
    pub async fn new(settings: Settings) -> Result<Self> {
        tracing::debug!("Initializing application state");
        let addr = settings.server_addr();
        let state = AppState::new(settings).await?;

        Ok(Self { addr, state })
    }

    /// The router this app serves, for in-process testing
    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone())
    }

    /// Run the server with graceful shutdown support
    ///
    /// In-flight requests complete before the process exits.
    pub async fn run_with_graceful_shutdown(self) -> Result<()> {
        let addr: SocketAddr = self
            .addr
            .parse()
            .with_context(|| format!("Invalid listen address {}", self.addr))?;
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        tracing::info!(addr = %addr, storage = %self.state.storage.backend_name(), "Server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!(uptime_seconds = self.state.uptime_seconds(), "Server stopped");
        Ok(())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}

/// Completes on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
