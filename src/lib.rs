//! Mutually authenticated SOAP reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ http::director ──▶ transport::instrumented ──▶ transport::upstream ──▶ SOAP service
//!                    │                                   │         │                 (mTLS)
//!                    │                                   │         └──▶ hooks (XPath → JSON POST, async)
//!                    │                                   ▼
//!     Operator ◀── http::api ◀──────────────────── trace::store (JSONL journal + window)
//!
//!     Cross-cutting: config, net::tls, observability, lifecycle
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod transport;

// Recording and reactions
pub mod hooks;
pub mod trace;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use trace::{TraceEntry, TraceStore};
