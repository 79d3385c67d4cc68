//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (hyper http1, method dispatch)
//!     ├─ CONNECT → tunnel.rs (dial origin, splice byte streams)
//!     └─ other   → relay.rs
//!                    → request.rs (buffer body, resolve target)
//!                    → [security: normalize headers, probe payload]
//!                    → origin via HTTP client
//!                    → response.rs (buffer body, strip hop headers)
//!                    → [transcript: record pair]
//!                    → Send to client
//! ```

pub mod relay;
pub mod request;
pub mod response;
pub mod server;
pub mod tunnel;

pub use relay::{relay_handler, RelayError};
pub use request::{BodyError, InboundRequest};
pub use response::OutboundResponse;
pub use server::{AppState, ProxyServer, ServerError};
pub use tunnel::{TunnelError, TunnelRegistry, TunnelSession, TunnelSnapshot, TunnelStats};
