//! Intercepting forward proxy.
//!
//! Relays plain HTTP requests to their origin, tunnels CONNECT traffic,
//! and records every relayed request/response pair in a SQLite transcript.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net (listener, tls) ──▶ http::server
//!                                          │
//!                     ┌────────────────────┴───────────────────┐
//!                     ▼ CONNECT                                ▼ other methods
//!               http::tunnel                              http::relay
//!            dial + byte splice                 security (headers, probe)
//!                     │                         origin via HTTP client
//!                     ▼                         transcript (store, recent)
//!                  Origin                                      │
//!                                                              ▼
//!                                                           Origin
//!
//!     Cross-cutting: config, observability, resilience, lifecycle, admin
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod security;
pub mod transcript;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
