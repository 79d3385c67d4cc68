//! Transcript subsystem.
//!
//! # Data Flow
//! ```text
//! Relayed transaction (buffered request + response):
//!     → recorder.rs (one inline attempt, transient failures retried in the background)
//!     → store.rs (request row → id → response row, one transaction each)
//!     → format.rs (headers/cookies as auditable text)
//!     → recent.rs (bounded summary for the admin view)
//! ```
//!
//! # Design Decisions
//! - The store assigns request ids; a response row cannot exist without
//!   its request row
//! - Persistence failures are returned to the relay, never fatal
//! - No unbounded in-memory retention

pub mod format;
pub mod recent;
pub mod recorder;
pub mod store;

pub use recent::{RecentTranscripts, TranscriptSummary};
pub use recorder::{Recorded, TranscriptError, TranscriptRecorder};
pub use store::{RequestId, SqlTranscriptStore, StoreError, TranscriptStore};
