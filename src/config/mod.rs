//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → CLI flag overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the probe flag is read-only after startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, LimitsConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    PersistRetryConfig, ProbeConfig, Proto, ProxyConfig, TimeoutConfig, TlsConfig,
    TranscriptConfig,
};
pub use validation::{validate_config, ValidationError};
