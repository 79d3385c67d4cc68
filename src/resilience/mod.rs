//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Transcript write:
//!     → retries.rs (transient? back off and try again, bounded)
//!     → backoff.rs (exponential delay + jitter)
//! ```
//!
//! # Design Decisions
//! - Retries exist only for persistence; relayed traffic is never retried
//! - Every retry loop is bounded

pub mod backoff;
pub mod retries;

pub use retries::{retry_transient, RetryPolicy};
