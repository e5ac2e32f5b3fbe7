//! Upstream HTTP client.

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client, Error as ClientError},
    rt::TokioExecutor,
};

use crate::transport::Transport;

/// Pooled hyper client that presents the configured client certificate.
///
/// Plain `http://` upstreams are reached without TLS.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl UpstreamClient {
    /// Build a client from a rustls configuration.
    pub fn new(tls: rustls::ClientConfig) -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(https);
        Self { client }
    }
}

impl Transport for UpstreamClient {
    type Error = ClientError;

    fn round_trip(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, Self::Error>> {
        let pending = self.client.request(request);
        Box::pin(async move {
            let response = pending.await?;
            Ok(response.map(Body::new))
        })
    }
}
