use std::path::PathBuf;

use clap::Parser;

use soap_proxy::config::load_config;
use soap_proxy::lifecycle::startup;
use soap_proxy::observability::logging;

/// Mutually authenticated SOAP reverse proxy with a durable trace store.
#[derive(Parser, Debug)]
#[command(name = "soap-proxy", version, about)]
struct Args {
    /// TOML configuration file; built-in defaults and environment
    /// overrides are used without one.
    #[arg(short, long, env = "SOAP_PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    logging::init(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "soap-proxy starting"
    );

    startup::run(config, args.config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
