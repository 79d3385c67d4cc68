//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Peer address and request id flow through log fields
//! - Security alerts and persistence failures carry boolean marker fields
//!   (`security_alert`, `persistence_error`) for filtering

pub mod logging;
pub mod metrics;
