//! Connection pair driver
//!
//! Owns one accepted client connection and the upstream connection opened for
//! it, and performs all of their IO around a [`Negotiator`]:
//!
//! 1. PRELOGIN exchange in plaintext on both legs (encryption bytes rewritten)
//! 2. LOGIN7 held while the upstream TLS handshake runs inside PRELOGIN packets
//! 3. Rewritten LOGIN7 sent over TLS, then [`Session`] relays the rest

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

use super::negotiation::{Negotiator, RequestAction};
use super::relay::Session;
use crate::config::{ProxyDefinition, ServerConfig};
use crate::error::{ProxyError, Result};
use crate::protocol::sqlserver::constants::packet_type;
use crate::protocol::sqlserver::{write_message, Message, MessageReader, TdsTlsStream};
use crate::tls::TlsConnector;

/// Everything a pair needs from its listener
#[derive(Debug)]
pub struct PairSettings {
    pub proxy: Arc<ProxyDefinition>,
    pub server: ServerConfig,
    pub connector: Arc<TlsConnector>,
}

/// One client connection and its upstream server connection
pub struct ConnectionPair {
    client: TcpStream,
    client_addr: SocketAddr,
    settings: Arc<PairSettings>,
}

enum Event {
    Client(Option<Message>),
    Server(Option<Message>),
}

impl ConnectionPair {
    pub fn new(client: TcpStream, client_addr: SocketAddr, settings: Arc<PairSettings>) -> Self {
        Self {
            client,
            client_addr,
            settings,
        }
    }

    /// Connect upstream and run the pair to completion
    pub async fn run(self) -> Result<()> {
        let server = connect_upstream(&self.settings).await?;
        if let Err(e) = self.client.set_nodelay(true) {
            debug!(client = %self.client_addr, "set_nodelay failed: {}", e);
        }
        drive(self.client, server, &self.settings).await
    }
}

/// Open the upstream TCP connection under the connect timeout
async fn connect_upstream(settings: &PairSettings) -> Result<TcpStream> {
    let addr = settings.proxy.server_endpoint();
    debug!("Connecting to SQL Server at {}", addr);

    let connect_timeout = Duration::from_secs(settings.server.connect_timeout_secs);
    let stream = timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| ProxyError::Timeout(format!("Connecting to {}", addr)))?
        .map_err(|e| ProxyError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay on upstream failed: {}", e);
    }
    debug!("Connected to SQL Server at {}", addr);
    Ok(stream)
}

/// Run negotiation, the TLS upgrade and the relay over already-open streams
pub async fn drive<C, S>(client: C, server: S, settings: &PairSettings) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client_read, mut client_write) = split(client);
    let mut client_reader = MessageReader::new(client_read);
    let mut server_reader = MessageReader::new(server);
    let mut negotiator = Negotiator::new(settings.proxy.credentials.clone());

    loop {
        // Both futures are dropped before the event is handled
        let event = tokio::select! {
            message = client_reader.next_message() => Event::Client(message?),
            message = server_reader.next_message() => Event::Server(message?),
        };

        match event {
            Event::Client(None) => {
                debug!("Client closed during negotiation");
                return Ok(());
            }
            Event::Server(None) => {
                debug!("Server closed during negotiation");
                return Ok(());
            }
            Event::Client(Some(message)) => match negotiator.on_request(message)? {
                RequestAction::Forward(message) => {
                    write_message(server_reader.get_mut(), &message).await?;
                }
                RequestAction::StartTls => break,
            },
            Event::Server(Some(message)) => {
                let message = negotiator.on_response(message)?;
                write_message(&mut client_write, &message).await?;
            }
        }
    }

    let server = match server_reader.into_inner() {
        Ok(server) => server,
        Err(e) => {
            negotiator.discard_held_login();
            return Err(e);
        }
    };

    let mut tls = match upgrade_upstream(server, settings).await {
        Ok(tls) => tls,
        Err(e) => {
            negotiator.discard_held_login();
            return Err(e);
        }
    };

    let login = negotiator.on_tls_established()?;
    write_message(&mut tls, &login).await?;
    debug!("Rewritten LOGIN7 sent over TLS");

    let (server_read, server_write) = split(tls);
    Session::new(
        client_reader,
        client_write,
        MessageReader::new(server_read),
        server_write,
    )
    .with_idle_timeout(settings.server.idle_timeout_secs)
    .relay()
    .await
}

/// TLS handshake with the server, records carried in PRELOGIN packets
async fn upgrade_upstream<S>(
    server: S,
    settings: &PairSettings,
) -> Result<TlsStream<TdsTlsStream<S>>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let server_name = settings.proxy.tls_server_name();
    let handshake_timeout = Duration::from_secs(settings.server.tls_handshake_timeout_secs);
    debug!(
        "Performing TLS handshake with {} (TDS-wrapped, verify={})",
        server_name,
        settings.connector.verify_mode()
    );

    let wrapped = TdsTlsStream::new(server, packet_type::PRELOGIN);
    let mut tls = timeout(
        handshake_timeout,
        settings.connector.connect_stream(wrapped, server_name),
    )
    .await
    .map_err(|_| {
        ProxyError::Timeout(format!(
            "TLS handshake with {} after {:?}",
            server_name, handshake_timeout
        ))
    })??;

    tls.get_mut().0.set_passthrough(true);
    debug!("Server TLS handshake complete (TDS-wrapped)");
    Ok(tls)
}
