//! Read API over the trace store.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::trace::TraceStore;

/// Routes for listing and fetching traces, under both `/traces` and the
/// dashboard's `/api/traces` prefix.
pub fn routes(store: Arc<TraceStore>) -> Router {
    Router::new()
        .route("/traces", get(list_traces))
        .route("/traces/{id}", get(get_trace))
        .route("/api/traces", get(list_traces))
        .route("/api/traces/{id}", get(get_trace))
        .with_state(store)
}

// Store reads can wait on a writer holding the lock across a journal
// sync, so they run off the async workers.

/// Current window, oldest first.
pub async fn list_traces(State(store): State<Arc<TraceStore>>) -> Response {
    match tokio::task::spawn_blocking(move || store.list()).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => lookup_failed(e),
    }
}

pub async fn get_trace(State(store): State<Arc<TraceStore>>, Path(id): Path<String>) -> Response {
    match tokio::task::spawn_blocking(move || store.get(&id)).await {
        Ok(Some(entry)) => Json(entry).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "trace not found").into_response(),
        Err(e) => lookup_failed(e),
    }
}

fn lookup_failed(error: tokio::task::JoinError) -> Response {
    tracing::error!(error = %error, "Trace lookup task failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "trace lookup failed").into_response()
}
