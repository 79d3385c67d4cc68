//! intercept-proxy
//!
//! Forward HTTP(S) proxy that records every relayed transaction and can
//! probe origins for XML external-entity disclosure.

use std::path::PathBuf;

use clap::Parser;

use intercept_proxy::config::{load_config, validate_config, ConfigError, Proto, ProxyConfig};
use intercept_proxy::lifecycle;
use intercept_proxy::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "intercept-proxy", version)]
#[command(about = "Intercepting forward proxy with transcript capture", long_about = None)]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8080.
    #[arg(long)]
    listen: Option<String>,

    /// Client-facing protocol.
    #[arg(long, value_enum)]
    proto: Option<Proto>,

    /// Certificate (PEM) used when proto is https.
    #[arg(long)]
    pem: Option<String>,

    /// Private key (PEM) used when proto is https.
    #[arg(long)]
    key: Option<String>,

    /// Replace request bodies with an XXE payload and watch for leaks.
    #[arg(long)]
    xxetest: bool,

    /// Transcript database, e.g. sqlite://transcripts.db?mode=rwc.
    #[arg(long)]
    database_url: Option<String>,
}

impl Args {
    fn apply(self, config: &mut ProxyConfig) {
        if let Some(listen) = self.listen {
            config.listener.bind_address = listen;
        }
        if let Some(proto) = self.proto {
            config.listener.proto = proto;
        }
        if let Some(pem) = self.pem {
            config.listener.tls.cert_path = pem;
        }
        if let Some(key) = self.key {
            config.listener.tls.key_path = key;
        }
        if self.xxetest {
            config.probe.xxe_test = true;
        }
        if let Some(url) = self.database_url {
            config.transcript.database_url = url;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    args.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        proto = %config.listener.proto,
        xxe_test = config.probe.xxe_test,
        database_url = %config.transcript.database_url,
        "intercept-proxy starting"
    );

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
