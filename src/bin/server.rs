//! RegionStore Server Binary
//!
//! Opens a provider from a JSON configuration and serves it over TCP.

use std::sync::Arc;

use clap::Parser;
use regionstore::network::Server;
use regionstore::{Provider, ProviderConfig, ServerConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// RegionStore Server
#[derive(Parser, Debug)]
#[command(name = "regionstore-server")]
#[command(about = "Network-attached region storage target")]
#[command(version)]
struct Args {
    /// Provider configuration file (JSON); an in-memory target when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7070")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "256")]
    max_connections: usize,

    /// Connection write timeout in milliseconds (0 = none)
    #[arg(long, default_value = "5000")]
    write_timeout_ms: u64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,regionstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("RegionStore Server v{}", regionstore::VERSION);
    tracing::info!("Listen address: {}", args.listen);

    let provider_config = match &args.config {
        Some(path) => {
            let loaded = std::fs::read_to_string(path)
                .map_err(regionstore::StoreError::from)
                .and_then(|text| ProviderConfig::from_json(&text));
            match loaded {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!("Failed to load configuration {}: {}", path, e);
                    std::process::exit(1);
                }
            }
        }
        None => ProviderConfig::default(),
    };

    let config = ServerConfig::builder()
        .provider(provider_config.clone())
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .write_timeout_ms(args.write_timeout_ms)
        .build();

    // Open provider
    let provider = match Provider::open(provider_config) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            tracing::error!("Failed to open provider: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Provider configuration: {}", provider.get_config());

    let mut server = Server::new(config, provider);
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
