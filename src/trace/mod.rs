//! Trace recording subsystem.
//!
//! # Data Flow
//! ```text
//! InstrumentedTransport
//!     → entry.rs (TraceEntry built once per exchange)
//!     → store.rs (journal append + bounded in-memory window)
//!     → http::api (GET /traces, GET /traces/{id})
//! ```

pub mod entry;
pub mod store;

pub use entry::{HeaderSnapshot, MessageSnapshot, TraceEntry};
pub use store::{StoreError, StoreOptions, TraceStore};
