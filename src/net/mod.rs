//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! startup
//!     → tls.rs (client cert, key, CA bundle → rustls ClientConfig)
//!     → transport::UpstreamClient (mutually authenticated HTTPS)
//!
//! optional inbound TLS
//!     → tls.rs (server cert, key → axum-server RustlsConfig)
//! ```
//!
//! # Design Decisions
//! - TLS material is loaded once; any failure aborts startup
//! - Minimum protocol version is TLS 1.2

pub mod tls;
