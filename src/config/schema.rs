//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the intercepting proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, protocol, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Body buffering limits.
    pub limits: LimitsConfig,

    /// Security probe (XXE test mode) settings.
    pub probe: ProbeConfig,

    /// Transcript persistence settings.
    pub transcript: TranscriptConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin diagnostic API settings.
    pub admin: AdminConfig,
}

/// Protocol spoken on the client-facing listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    /// Plain-text HTTP/1.1.
    Http,
    /// HTTP/1.1 over TLS using the configured certificate pair.
    #[default]
    Https,
}

impl std::fmt::Display for Proto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Proto::Http => write!(f, "http"),
            Proto::Https => write!(f, "https"),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Whether the listener terminates TLS.
    pub proto: Proto,

    /// Certificate pair, consulted only when `proto` is https.
    pub tls: TlsConfig,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            proto: Proto::default(),
            tls: TlsConfig::default(),
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: "server.pem".to_string(),
            key_path: "server.key".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Origin dial timeout for CONNECT tunnels in seconds.
    pub connect_secs: u64,

    /// Origin round trip timeout for relayed requests in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            request_secs: 30,
        }
    }
}

/// Limits on buffered bodies.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request or response body the relay will buffer.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Security probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProbeConfig {
    /// Replace outgoing request bodies with the XXE payload and scan responses.
    pub xxe_test: bool,
}

/// Transcript persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// sqlx connection URL for the transcript database.
    pub database_url: String,

    /// Pool size.
    pub max_connections: u32,

    /// Number of recent transactions kept in memory for the admin view.
    /// Zero disables in-memory retention.
    pub recent_capacity: usize,

    /// Retry policy for transient persistence failures.
    pub retry: PersistRetryConfig,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://transcripts.db?mode=rwc".to_string(),
            max_connections: 5,
            recent_capacity: 256,
            retry: PersistRetryConfig::default(),
        }
    }
}

/// Retry configuration for the persistence path.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistRetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for PersistRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 500,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin diagnostic API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // no usable default; validation rejects an empty key
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.proto, Proto::Https);
        assert_eq!(config.timeouts.connect_secs, 10);
        assert!(!config.probe.xxe_test);
        assert_eq!(config.transcript.recent_capacity, 256);
    }

    #[test]
    fn proto_is_lowercase() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            proto = "http"

            [probe]
            xxe_test = true
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.proto, Proto::Http);
        assert!(config.probe.xxe_test);
    }

    #[test]
    fn unknown_proto_is_rejected() {
        let result: Result<ProxyConfig, _> = toml::from_str(
            r#"
            [listener]
            proto = "gopher"
            "#,
        );
        assert!(result.is_err());
    }
}
