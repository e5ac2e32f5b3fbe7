//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use soap_proxy::config::HookConfig;
use soap_proxy::hooks::{build_hook_rules, ActionHooks, SharedHooks};
use soap_proxy::http::{Director, HttpServer};
use soap_proxy::lifecycle::Shutdown;
use soap_proxy::trace::{StoreOptions, TraceStore};
use soap_proxy::transport::{InstrumentedTransport, UpstreamClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A request as the mock upstream received it.
#[derive(Debug, Clone)]
pub struct Received {
    pub head: String,
    pub body: Vec<u8>,
}

impl Received {
    /// Request line, e.g. `POST /soap/orders HTTP/1.1`.
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    /// First value of header `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

/// Read one HTTP/1.1 request with a `Content-Length` body.
pub async fn read_request(socket: &mut TcpStream) -> Option<Received> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut received = Received {
        head,
        body: Vec::new(),
    };
    let length: usize = received
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    received.body = body;
    Some(received)
}

/// Start a mock SOAP upstream that answers every request with `status`
/// and `body`. Each received request is sent on the returned channel.
pub async fn start_mock_upstream(
    status: u16,
    body: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<Received>) {
    start_delayed_upstream(status, body, Duration::ZERO).await
}

/// Like `start_mock_upstream`, but waits `delay` after reading each
/// request before answering.
pub async fn start_delayed_upstream(
    status: u16,
    body: &'static str,
    delay: Duration,
) -> (SocketAddr, mpsc::UnboundedReceiver<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let _ = tx.send(request);
                        tokio::time::sleep(delay).await;
                        let response = format!(
                            "HTTP/1.1 {} Mock\r\nContent-Type: text/xml; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, rx)
}

/// Start a hook endpoint that accepts every POST with 204 and forwards
/// the body text on the returned channel.
pub async fn start_hook_sink() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(&mut socket).await {
                    let _ = tx.send(String::from_utf8_lossy(&request.body).into_owned());
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// TLS configuration without client credentials; enough for `http://`
/// upstreams in tests.
pub fn plain_client_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(rustls::RootCertStore::empty())
        .with_no_client_auth()
}

/// A running proxy with its API listener.
pub struct TestProxy {
    pub proxy_addr: SocketAddr,
    pub api_addr: SocketAddr,
    pub store: Arc<TraceStore>,
    pub hooks: SharedHooks,
    pub shutdown: Arc<Shutdown>,
    pub task: JoinHandle<()>,
}

impl TestProxy {
    pub fn proxy_url(&self, path: &str) -> String {
        format!("http://{}{}", self.proxy_addr, path)
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("http://{}{}", self.api_addr, path)
    }

    /// Trigger shutdown and wait for both servers to drain.
    pub async fn stop(self) -> Arc<TraceStore> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop")
            .unwrap();
        self.store
    }
}

/// Hook rule firing on `action`, extracting `xpath`, posting to `sink`.
pub fn hook(action: &str, xpath: &str, sink: SocketAddr) -> HookConfig {
    HookConfig {
        soap_action: Some(action.to_string()),
        xpath: Some(xpath.to_string()),
        endpoint: Some(format!("http://{}/hook", sink)),
        timeout_secs: 5,
    }
}

/// Start a proxy in front of `upstream`, journaling to `journal`.
pub async fn start_proxy(
    upstream: &str,
    hooks: &[HookConfig],
    journal: &Path,
    max_traces: usize,
) -> TestProxy {
    let store = Arc::new(
        TraceStore::open(
            journal,
            StoreOptions {
                max_len: max_traces,
                fsync: false,
            },
        )
        .unwrap(),
    );
    let rules = build_hook_rules(hooks).unwrap();
    let hooks: SharedHooks = Arc::new(ArcSwap::from_pointee(ActionHooks::new(rules).unwrap()));
    let transport = Arc::new(InstrumentedTransport::new(
        UpstreamClient::new(plain_client_config()),
        Arc::clone(&store),
        Arc::clone(&hooks),
    ));
    let server = HttpServer::new(transport, Director::new(upstream).unwrap());

    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy_listener.local_addr().unwrap();
    let api_addr = api_listener.local_addr().unwrap();

    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = Arc::clone(&shutdown);
    let task = tokio::spawn(async move {
        server
            .run(proxy_listener, api_listener, &server_shutdown)
            .await
            .unwrap();
    });

    TestProxy {
        proxy_addr,
        api_addr,
        store,
        hooks,
        shutdown,
        task,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
