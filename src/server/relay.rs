//! Established-phase relay
//!
//! Once the rewritten LOGIN7 is on its way, the pair only moves messages:
//! one task per direction frames what it reads and writes it out unchanged,
//! in arrival order. When either direction ends, the other is aborted.

use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::codec::Encoder;
use tracing::Level;

use crate::error::{ProxyError, Result};
use crate::protocol::sqlserver::{classify_request, MessageReader, TdsFramer};

/// Relay direction, used for logging and the idle timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("client->server"),
            Direction::ServerToClient => f.write_str("server->client"),
        }
    }
}

/// A relay between an authenticated client and server
///
/// Readers are passed in already constructed so bytes the client sent
/// ahead during negotiation are not lost.
pub struct Session<CR, CW, SR, SW> {
    client_reader: MessageReader<CR>,
    client_writer: CW,
    server_reader: MessageReader<SR>,
    server_writer: SW,
    /// Idle timeout on client reads (0 = disabled)
    idle_timeout: Duration,
}

impl<CR, CW, SR, SW> Session<CR, CW, SR, SW>
where
    CR: AsyncRead + Unpin + Send + 'static,
    CW: AsyncWrite + Unpin + Send + 'static,
    SR: AsyncRead + Unpin + Send + 'static,
    SW: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        client_reader: MessageReader<CR>,
        client_writer: CW,
        server_reader: MessageReader<SR>,
        server_writer: SW,
    ) -> Self {
        Self {
            client_reader,
            client_writer,
            server_reader,
            server_writer,
            idle_timeout: Duration::ZERO,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout_secs: u64) -> Self {
        self.idle_timeout = Duration::from_secs(idle_timeout_secs);
        self
    }

    /// Run the bidirectional relay until either side finishes
    ///
    /// A clean close on either side is `Ok`. The first error, including an
    /// idle timeout, is returned.
    pub async fn relay(self) -> Result<()> {
        debug!(
            "Starting relay session with idle_timeout={:?}",
            self.idle_timeout
        );

        let mut client_to_server = tokio::spawn(forward_messages(
            self.client_reader,
            self.server_writer,
            Direction::ClientToServer,
            self.idle_timeout,
        ));
        let mut server_to_client = tokio::spawn(forward_messages(
            self.server_reader,
            self.client_writer,
            Direction::ServerToClient,
            Duration::ZERO,
        ));

        let finished = tokio::select! {
            result = &mut client_to_server => {
                server_to_client.abort();
                result
            }
            result = &mut server_to_client => {
                client_to_server.abort();
                result
            }
        };

        debug!("Relay session ended");
        match finished {
            Ok(result) => result.map(|_| ()),
            Err(e) => Err(ProxyError::Connection(format!("relay task failed: {}", e))),
        }
    }
}

/// Forward framed messages from `reader` to `writer` until EOF
///
/// Returns the number of messages forwarded.
async fn forward_messages<R, W>(
    mut reader: MessageReader<R>,
    mut writer: W,
    direction: Direction,
    idle_timeout: Duration,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut framer = TdsFramer::new();
    let mut outbound = BytesMut::new();
    let mut forwarded = 0u64;

    loop {
        let next = if idle_timeout.is_zero() {
            reader.next_message().await?
        } else {
            match timeout(idle_timeout, reader.next_message()).await {
                Ok(result) => result?,
                Err(_) => {
                    debug!(
                        "{}: idle timeout ({:?}) after {} messages",
                        direction, idle_timeout, forwarded
                    );
                    return Err(ProxyError::Timeout(format!(
                        "idle for {:?}",
                        idle_timeout
                    )));
                }
            }
        };

        let Some(message) = next else {
            debug!("{}: EOF after {} messages", direction, forwarded);
            break;
        };

        if tracing::enabled!(target: "tds_credential_proxy", Level::TRACE) {
            let kind = match direction {
                Direction::ClientToServer => classify_request(message.clone()).kind(),
                Direction::ServerToClient => "response",
            };
            trace!(
                "{}: {} type 0x{:02X} ({} bytes)",
                direction,
                kind,
                message.packet_type(),
                message.len()
            );
        }
        framer.encode(message, &mut outbound)?;

        writer.write_all(&outbound).await?;
        writer.flush().await?;
        outbound.clear();
        forwarded += 1;
    }

    if let Err(e) = writer.shutdown().await {
        debug!("{}: shutdown after EOF failed: {}", direction, e);
    }
    Ok(forwarded)
}
