//! tds-credential-proxy - SQL Server proxy with credential substitution
//!
//! This binary runs one listener per configured proxy. Each accepted client is
//! connected to its SQL Server over TLS and logged in with the configured
//! account, whatever credentials the client presented.

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use tds_credential_proxy::{config, Listener, Result};

#[derive(Parser)]
#[command(name = "tds-credential-proxy")]
#[command(version)]
#[command(about = "SQL Server (TDS) proxy that forces upstream TLS and substitutes login credentials")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connection list: bindHost:bindPort=user:password@serverHost:serverPort[,...]
    #[arg(long, env = "MSSQLPROXY_PROXIES", hide_env_values = true)]
    proxies: Option<String>,

    /// Override max concurrent connections per listener (0 = unlimited)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref(), cli.proxies.as_deref())?;
    if let Some(max) = cli.max_connections {
        config.server.max_connections = max;
    }

    // Priority: --verbose flag, then RUST_LOG env var, then the configured level
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone())
    };
    tracing_subscriber::fmt().with_env_filter(&log_level).init();

    info!("Starting tds-credential-proxy v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {:?}", path);
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut listeners = Vec::with_capacity(config.proxies.len());
    for proxy in &config.proxies {
        let listener =
            Listener::bind(proxy.clone(), config.server.clone(), shutdown_tx.subscribe()).await?;
        listeners.push(listener);
    }

    let all_stats: Vec<_> = listeners.iter().map(Listener::stats).collect();
    let handles: Vec<_> = listeners
        .into_iter()
        .map(|listener| {
            tokio::spawn(async move {
                if let Err(e) = listener.run().await {
                    error!("Listener error: {}", e);
                }
            })
        })
        .collect();

    info!("Proxy ready: {} listener(s)", handles.len());

    wait_for_shutdown().await;

    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }

    let total: u64 = all_stats
        .iter()
        .map(|s| s.connections_accepted.load(Ordering::Relaxed))
        .sum();
    info!("Shutdown complete. Total connections handled: {}", total);

    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, initiating shutdown..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown..."),
                }
                return;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Received Ctrl+C, initiating shutdown...");
}
