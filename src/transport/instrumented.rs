//! Instrumented transport: records every exchange it forwards.
//!
//! # Per exchange
//! 1. Assign a UUID, note client address and arrival time.
//! 2. Capture the request body under the cap and replace it with a
//!    replayable copy.
//! 3. Detect the SOAP operation (header first, then body).
//! 4. Forward through the base transport, timing the call.
//! 5. Failure: record the error and return the base error unchanged.
//! 6. Success: capture the response body the same way, record, then hand
//!    the response body to the action hooks without waiting on them.
//!
//! Exactly one trace entry is written per exchange.

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, request, Request, Response};
use chrono::Utc;
use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::hooks::SharedHooks;
use crate::observability::metrics;
use crate::trace::{MessageSnapshot, TraceEntry, TraceStore};
use crate::transport::capture::{capture_body, set_replayed_length, MAX_CAPTURE_BYTES};
use crate::transport::soap_action::detect_operation;
use crate::transport::Transport;

/// Transport decorator that writes one trace entry per exchange.
pub struct InstrumentedTransport<T> {
    base: T,
    store: Arc<TraceStore>,
    hooks: SharedHooks,
    max_body: usize,
}

impl<T: Transport> InstrumentedTransport<T> {
    pub fn new(base: T, store: Arc<TraceStore>, hooks: SharedHooks) -> Self {
        Self {
            base,
            store,
            hooks,
            max_body: MAX_CAPTURE_BYTES,
        }
    }

    /// Override the capture cap.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    pub fn store(&self) -> &Arc<TraceStore> {
        &self.store
    }

    async fn exchange(&self, request: Request<Body>) -> Result<Response<Body>, T::Error> {
        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let client_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        let (mut parts, body) = request.into_parts();
        let captured = capture_body(body, self.max_body).await;
        if let Some(error) = &captured.read_error {
            tracing::warn!(trace_id = %id, error = %error, "Request body read ended early");
        }
        let request_snapshot = captured.snapshot(&parts.headers, self.max_body);
        if captured.truncated {
            metrics::record_truncation("request");
            set_replayed_length(&mut parts.headers, captured.bytes.len());
        }

        let soap_action = detect_operation(&parts.headers, &captured.bytes);

        let mut entry = TraceEntry {
            id,
            started_at,
            duration_ms: 0,
            client_addr,
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            host: request_host(&parts),
            status_code: None,
            soap_action: soap_action.clone(),
            request: request_snapshot,
            response: MessageSnapshot::default(),
            error: None,
            persist_error: None,
            request_size: captured.original_len,
            response_size: 0,
        };

        tracing::debug!(
            trace_id = %entry.id,
            method = %entry.method,
            path = %entry.path,
            soap_action = %soap_action,
            "Forwarding exchange"
        );

        let request = Request::from_parts(parts, captured.replay());
        let result = self.base.round_trip(request).await;
        let elapsed = start.elapsed();
        entry.duration_ms = elapsed.as_millis() as u64;

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                let description = error_chain(&error);
                tracing::warn!(
                    trace_id = %entry.id,
                    duration_ms = entry.duration_ms,
                    error = %description,
                    "Upstream exchange failed"
                );
                metrics::record_exchange("transport_error", elapsed);
                entry.error = Some(description);
                self.record(entry).await;
                return Err(error);
            }
        };

        let (mut parts, body) = response.into_parts();
        let captured = capture_body(body, self.max_body).await;
        if let Some(error) = &captured.read_error {
            tracing::warn!(trace_id = %entry.id, error = %error, "Response body read ended early");
        }
        entry.response = captured.snapshot(&parts.headers, self.max_body);
        if captured.truncated {
            metrics::record_truncation("response");
            set_replayed_length(&mut parts.headers, captured.bytes.len());
        }
        entry.status_code = Some(parts.status.as_u16());
        entry.response_size = captured.original_len;

        tracing::info!(
            trace_id = %entry.id,
            status = parts.status.as_u16(),
            soap_action = %soap_action,
            duration_ms = entry.duration_ms,
            "Exchange recorded"
        );
        metrics::record_exchange("success", elapsed);
        self.record(entry).await;

        self.hooks.load().maybe_handle(&soap_action, &captured.bytes);

        Ok(Response::from_parts(parts, captured.replay()))
    }

    /// Write the entry to the store off the async worker. Store failures
    /// are logged; they never fail the exchange.
    async fn record(&self, entry: TraceEntry) {
        let id = entry.id.clone();
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.add(entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(trace_id = %id, error = %e, "Trace store rejected entry"),
            Err(e) => tracing::error!(trace_id = %id, error = %e, "Trace store task failed"),
        }
    }
}

impl<T: Transport> Transport for InstrumentedTransport<T> {
    type Error = T::Error;

    fn round_trip(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, Self::Error>> {
        Box::pin(self.exchange(request))
    }
}

fn request_host(parts: &request::Parts) -> String {
    parts
        .uri
        .authority()
        .map(|authority| authority.to_string())
        .or_else(|| {
            parts
                .headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default()
}

/// Error text including its source chain.
fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
