//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (metrics, config watcher, signals)
//! - Bind listeners and begin accepting traffic
//! - Close the trace store once the servers have drained
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::net::TcpListener;

use crate::config::watcher::ConfigWatcher;
use crate::config::{ConfigError, ProxyConfig};
use crate::hooks::{build_hook_rules, ActionHooks, SharedHooks};
use crate::http::{Director, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::net::tls::{build_client_config, load_tls_config};
use crate::observability::metrics;
use crate::trace::{StoreOptions, TraceStore};
use crate::transport::{InstrumentedTransport, UpstreamClient};

/// Start every subsystem from a validated `config` and serve until a stop
/// signal arrives. `config_path` enables hot reload of hook rules.
pub async fn run(
    config: ProxyConfig,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Listener TLS builds its ServerConfig from the process default provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let store = Arc::new(TraceStore::open(
        &config.store.path,
        StoreOptions {
            max_len: config.store.max_traces,
            fsync: config.store.fsync,
        },
    )?);

    let tls = build_client_config(
        Path::new(&config.upstream.cert_file),
        Path::new(&config.upstream.key_file),
        Path::new(&config.upstream.ca_file),
    )
    .map_err(ConfigError::Tls)?;

    let rules = build_hook_rules(&config.hooks).map_err(ConfigError::Validation)?;
    tracing::info!(rules = rules.len(), "Action hooks loaded");
    let hooks: SharedHooks = Arc::new(ArcSwap::from_pointee(ActionHooks::new(rules)?));

    // Dropping the watcher stops it, so it lives until shutdown.
    let _watcher = match &config_path {
        Some(path) => Some(spawn_hook_reload(path, Arc::clone(&hooks))?),
        None => None,
    };

    let director = Director::new(&config.upstream.url)?;
    let transport = Arc::new(InstrumentedTransport::new(
        UpstreamClient::new(tls),
        Arc::clone(&store),
        hooks,
    ));

    let mut server = HttpServer::new(transport, director);
    if let Some(tls) = &config.listener.tls {
        let server_tls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path))
            .await
            .map_err(ConfigError::Tls)?;
        server = server.with_tls(server_tls);
    }

    let proxy_listener = TcpListener::bind(&config.listener.bind_address).await?;
    let api_listener = TcpListener::bind(&config.api.bind_address).await?;
    tracing::info!(
        proxy = %proxy_listener.local_addr()?,
        api = %api_listener.local_addr()?,
        upstream = %config.upstream.url,
        "Listening for connections"
    );

    let shutdown = Arc::new(Shutdown::new());
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { signals::shutdown_on_signal(&shutdown).await });
    }

    server.run(proxy_listener, api_listener, &shutdown).await?;

    store.close()?;
    Ok(())
}

/// Watch `path` and swap in each valid hook rule set.
fn spawn_hook_reload(
    path: &Path,
    hooks: SharedHooks,
) -> Result<notify::RecommendedWatcher, Box<dyn std::error::Error>> {
    let (watcher, mut updates) = ConfigWatcher::new(path);
    let handle = watcher.run()?;

    tokio::spawn(async move {
        while let Some(rules) = updates.recv().await {
            let count = rules.len();
            match ActionHooks::new(rules) {
                Ok(next) => {
                    tracing::info!(rules = count, "Action hooks reloaded");
                    hooks.store(Arc::new(next));
                }
                Err(e) => tracing::error!(error = %e, "Failed to rebuild action hooks"),
            }
        }
    });

    Ok(handle)
}
