//! Rewrites inbound requests so they target the upstream service.
//!
//! # Responsibilities
//! - Scheme and authority taken from the upstream URL
//! - Upstream base path joined with the request path (single slash)
//! - Query string preserved, `Host` set to the upstream host
//! - Hop-by-hop headers stripped, `X-Forwarded-For` appended

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::uri::{Authority, InvalidUri, PathAndQuery, Scheme};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Uri, Version};

/// Headers that describe a single connection and must not be forwarded.
static HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Error for an upstream URL the director cannot target.
#[derive(Debug, thiserror::Error)]
pub enum DirectorError {
    #[error("invalid upstream url: {0}")]
    InvalidUri(#[from] InvalidUri),

    #[error("upstream url {0:?} needs a scheme and host")]
    Incomplete(String),

    #[error("failed to rebuild request uri: {0}")]
    Rebuild(#[from] axum::http::Error),
}

/// Upstream target for every proxied request.
#[derive(Debug, Clone)]
pub struct Director {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    host: HeaderValue,
}

impl Director {
    pub fn new(upstream: &str) -> Result<Self, DirectorError> {
        let uri: Uri = upstream.parse()?;
        let (Some(scheme), Some(authority)) = (uri.scheme().cloned(), uri.authority().cloned()) else {
            return Err(DirectorError::Incomplete(upstream.to_string()));
        };
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|_| DirectorError::Incomplete(upstream.to_string()))?;

        Ok(Self {
            scheme,
            authority,
            base_path: uri.path().to_string(),
            host,
        })
    }

    /// Point `request` at the upstream. `client` is the peer address, when
    /// known.
    pub fn direct(
        &self,
        mut request: Request<Body>,
        client: Option<SocketAddr>,
    ) -> Result<Request<Body>, DirectorError> {
        let path = match self.base_path.as_str() {
            "" | "/" => request.uri().path().to_string(),
            base => single_joining_slash(base, request.uri().path()),
        };
        let path_and_query: PathAndQuery = match request.uri().query() {
            Some(query) => format!("{path}?{query}").parse()?,
            None => path.parse()?,
        };

        *request.uri_mut() = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()?;
        // The upstream client speaks HTTP/1.1 only.
        *request.version_mut() = Version::HTTP_11;

        let headers = request.headers_mut();
        remove_hop_by_hop(headers);
        headers.insert(header::HOST, self.host.clone());
        if let Some(addr) = client {
            append_forwarded_for(headers, addr);
        }

        Ok(request)
    }
}

/// Join two URL paths with exactly one slash between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Strip connection-scoped headers, including any named in `Connection`.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, addr: SocketAddr) {
    let ip = addr.ip().to_string();
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}
