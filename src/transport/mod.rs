//! Upstream transport subsystem.
//!
//! # Data Flow
//! ```text
//! http::server (proxy handler)
//!     → instrumented.rs (capture, detect operation, time, record, hooks)
//!     → upstream.rs (mTLS hyper client)
//!     → upstream SOAP service
//! ```
//!
//! `Transport` is the seam between the two: the instrumented transport
//! decorates any base transport and returns the base transport's own
//! error type unchanged.

pub mod capture;
pub mod instrumented;
pub mod soap_action;
pub mod upstream;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;

pub use capture::MAX_CAPTURE_BYTES;
pub use instrumented::InstrumentedTransport;
pub use upstream::UpstreamClient;

/// One request/response exchange with an upstream.
pub trait Transport: Send + Sync + 'static {
    /// Failure to obtain a response.
    type Error: std::error::Error + Send + Sync + 'static;

    fn round_trip(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, Self::Error>>;
}
