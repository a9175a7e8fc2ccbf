//! TCP listener for incoming TDS client connections

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};

use super::pair::{ConnectionPair, PairSettings};
use crate::config::{ProxyDefinition, ServerConfig};
use crate::error::{ProxyError, Result};
use crate::tls::TlsConnector;

/// Listener statistics
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections rejected due to limit
    pub connections_rejected: AtomicU64,
    /// Connections that ended with an error
    pub connections_failed: AtomicU64,
}

/// Accepts clients for one proxy definition and runs a pair for each
pub struct Listener {
    listener: TcpListener,
    settings: Arc<PairSettings>,
    stats: Arc<ListenerStats>,
    shutdown_rx: broadcast::Receiver<()>,
    /// Connection limit semaphore (None = unlimited)
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind the proxy's listen address and build its upstream TLS connector
    pub async fn bind(
        proxy: ProxyDefinition,
        server: ServerConfig,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let addr = proxy.bind_endpoint();
        let connector = TlsConnector::new(&proxy.tls)?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProxyError::Connection(format!("Failed to bind {}: {}", addr, e)))?;

        let connection_semaphore = if server.max_connections > 0 {
            Some(Arc::new(Semaphore::new(server.max_connections)))
        } else {
            None
        };

        info!("Creating proxy: {}", proxy);
        info!(
            "Listening on {} -> {} ({} connections, upstream TLS verify={})",
            listener.local_addr().map(|a| a.to_string()).unwrap_or(addr),
            proxy.server_endpoint(),
            match server.max_connections {
                0 => "unlimited".to_string(),
                n => format!("max {}", n),
            },
            connector.verify_mode()
        );

        Ok(Self {
            listener,
            settings: Arc::new(PairSettings {
                proxy: Arc::new(proxy),
                server,
                connector: Arc::new(connector),
            }),
            stats: Arc::new(ListenerStats::default()),
            shutdown_rx,
            connection_semaphore,
        })
    }

    /// Get listener statistics
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Get the local address the listener is bound to.
    ///
    /// This is useful when binding to port 0 to get an OS-assigned port.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until the shutdown signal
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.spawn_pair(stream, addr),
                        Err(e) => {
                            error!("Accept error: {}", e);
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        info!(
            "Listener stopped. Total: {}, Active: {}, Rejected: {}, Failed: {}",
            self.stats.connections_accepted.load(Ordering::Relaxed),
            self.stats.connections_active.load(Ordering::Relaxed),
            self.stats.connections_rejected.load(Ordering::Relaxed),
            self.stats.connections_failed.load(Ordering::Relaxed)
        );

        Ok(())
    }

    fn spawn_pair(&self, stream: TcpStream, addr: SocketAddr) {
        let permit = match &self.connection_semaphore {
            Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(
                        "Connection from {} rejected: max connections ({}) reached",
                        addr, self.settings.server.max_connections
                    );
                    self.stats
                        .connections_rejected
                        .fetch_add(1, Ordering::Relaxed);
                    return;
                }
            },
            None => None,
        };

        info!("Connection opened from {}", addr);
        self.stats
            .connections_accepted
            .fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let settings = Arc::clone(&self.settings);
        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_rx.resubscribe();

        tokio::spawn(async move {
            // Held for the pair's lifetime
            let _permit = permit;

            let pair = ConnectionPair::new(stream, addr, settings);
            let result = tokio::select! {
                result = pair.run() => result,
                _ = shutdown_rx.recv() => {
                    debug!("Connection from {} closed by shutdown", addr);
                    Ok(())
                }
            };

            if let Err(e) = result {
                warn!("Connection from {} error: {}", addr, e);
                stats.connections_failed.fetch_add(1, Ordering::Relaxed);
            }
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            info!("Connection closed from {}", addr);
        });
    }
}
