//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Proxy router: `/healthz` plus a catch-all that forwards to upstream
//! - API router: trace list and lookup
//! - Wire up middleware (tracing, request ID)
//! - Serve plain or TLS listeners with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::http::api;
use crate::http::director::{remove_hop_by_hop, Director};
use crate::lifecycle::Shutdown;
use crate::transport::{InstrumentedTransport, Transport, UpstreamClient};

/// How long TLS connections may drain after shutdown is triggered.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// State injected into the proxy handler.
#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<InstrumentedTransport<UpstreamClient>>,
    pub director: Arc<Director>,
    /// Exchanges still running, including those whose client has gone.
    pub exchanges: TaskTracker,
}

/// Proxy and API servers.
pub struct HttpServer {
    proxy: Router,
    api: Router,
    tls: Option<RustlsConfig>,
    exchanges: TaskTracker,
}

impl HttpServer {
    pub fn new(transport: Arc<InstrumentedTransport<UpstreamClient>>, director: Director) -> Self {
        let api = with_middleware(api::routes(Arc::clone(transport.store())));
        let exchanges = TaskTracker::new();
        let state = AppState {
            transport,
            director: Arc::new(director),
            exchanges: exchanges.clone(),
        };
        let proxy = with_middleware(
            Router::new()
                .route("/healthz", any(healthz))
                .route("/", any(proxy_handler))
                .route("/{*path}", any(proxy_handler))
                .with_state(state),
        );

        Self {
            proxy,
            api,
            tls: None,
            exchanges,
        }
    }

    /// Serve the proxy listener over TLS.
    pub fn with_tls(mut self, tls: RustlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Run both servers until `shutdown` fires, then drain in-flight requests.
    ///
    /// Returns only after every spawned exchange has finished, so its
    /// trace is recorded before the caller closes the store.
    pub async fn run(
        self,
        proxy_listener: TcpListener,
        api_listener: TcpListener,
        shutdown: &Shutdown,
    ) -> Result<(), std::io::Error> {
        let Self {
            proxy,
            api,
            tls,
            exchanges,
        } = self;
        let proxy_addr = proxy_listener.local_addr()?;
        let api_addr = api_listener.local_addr()?;
        tracing::info!(
            proxy = %proxy_addr,
            api = %api_addr,
            tls = tls.is_some(),
            "HTTP servers starting"
        );

        let proxy_app = proxy.into_make_service_with_connect_info::<SocketAddr>();
        let api_app = api.into_make_service_with_connect_info::<SocketAddr>();

        let proxy = {
            let stop = shutdown.signal();
            async move {
                match tls {
                    Some(tls) => {
                        let handle = axum_server::Handle::new();
                        let drain = handle.clone();
                        tokio::spawn(async move {
                            stop.await;
                            drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
                        });
                        axum_server::from_tcp_rustls(proxy_listener.into_std()?, tls)
                            .handle(handle)
                            .serve(proxy_app)
                            .await
                    }
                    None => {
                        axum::serve(proxy_listener, proxy_app)
                            .with_graceful_shutdown(stop)
                            .await
                    }
                }
            }
        };

        let api = axum::serve(api_listener, api_app).with_graceful_shutdown(shutdown.signal());

        tokio::try_join!(proxy, async move { api.await })?;

        exchanges.close();
        if !exchanges.is_empty() {
            tracing::info!(pending = exchanges.len(), "Waiting for in-flight exchanges");
        }
        exchanges.wait().await;

        tracing::info!("HTTP servers stopped");
        Ok(())
    }
}

fn with_middleware(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Forward one request through the instrumented transport.
///
/// The exchange runs in its own task so a client that disconnects
/// mid-flight cannot cancel it before its trace is written.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let request = match state.director.direct(request, Some(addr)) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(client = %addr, error = %e, "Cannot build upstream request");
            return (StatusCode::BAD_REQUEST, "Invalid request target").into_response();
        }
    };

    let transport = Arc::clone(&state.transport);
    let exchange = state
        .exchanges
        .spawn(async move { transport.round_trip(request).await });

    match exchange.await {
        Ok(Ok(mut response)) => {
            remove_hop_by_hop(response.headers_mut());
            response
        }
        Ok(Err(e)) => {
            tracing::error!(client = %addr, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
        Err(e) => {
            tracing::error!(client = %addr, error = %e, "Exchange task failed");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
