//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outgoing request:
//!     → headers.rs (strip hop-by-hop, append X-Forwarded-For)
//!     → probe.rs (substitute XXE payload when enabled)
//!     → Forward to origin
//!
//! Incoming response:
//!     → headers.rs (strip hop-by-hop)
//!     → probe.rs (scan for leak marker, alert only)
//! ```
//!
//! # Design Decisions
//! - Both pieces are pure over their inputs; no locking needed
//! - The probe observes responses but never alters them

pub mod headers;
pub mod probe;

pub use headers::{append_forwarded_for, is_hop_by_hop, strip_hop_headers};
pub use probe::{ProbeFinding, SecurityProbe, LEAK_MARKER, XXE_PAYLOAD};
