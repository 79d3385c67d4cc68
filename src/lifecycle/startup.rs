//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect the transcript store
//! - Install the metrics exporter when enabled
//! - Start the admin API when enabled
//! - Bind the proxy listener and serve until a termination signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::admin::{setup_admin_router, spawn_admin_server};
use crate::config::ProxyConfig;
use crate::http::{ProxyServer, ServerError};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;
use crate::transcript::{SqlTranscriptStore, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("transcript store: {0}")]
    Store(#[from] StoreError),

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("admin API: {0}")]
    Admin(#[source] std::io::Error),

    #[error("invalid {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

/// Run the proxy with a validated configuration until shutdown.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    let store = SqlTranscriptStore::connect(&config.transcript).await?;

    if config.observability.metrics_enabled {
        let addr = parse_addr(
            "observability.metrics_address",
            &config.observability.metrics_address,
        )?;
        metrics::init_metrics(addr)?;
    }

    let server = ProxyServer::new(&config, Arc::new(store))?;
    let shutdown = Shutdown::new();

    if config.admin.enabled {
        let addr = parse_addr("admin.bind_address", &config.admin.bind_address)?;
        let router = setup_admin_router(server.state().clone(), &config.admin.api_key);
        spawn_admin_server(addr, router, shutdown.subscribe())
            .await
            .map_err(StartupError::Admin)?;
    }

    let listener = Listener::bind(&config.listener).await?;
    spawn_signal_handler(shutdown.clone());

    server.run(listener, shutdown.subscribe()).await?;

    // stops the admin listener if the proxy exited on its own
    shutdown.trigger();
    Ok(())
}
