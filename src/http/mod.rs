//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! client connection (plain or TLS)
//!     → server.rs (Axum setup, request ID, tracing)
//!     → director.rs (rewrite target, strip hop-by-hop, X-Forwarded-For)
//!     → transport::InstrumentedTransport (capture, forward, record, hooks)
//!     → Send to client
//!
//! API connection
//!     → api.rs (trace list / lookup from the store window)
//! ```

pub mod api;
pub mod director;
pub mod server;

pub use director::Director;
pub use server::HttpServer;
