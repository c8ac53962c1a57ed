//! Self-healing TCP client socket.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::config::{Config, ConfigBuilder, Settings};
use crate::connector::Connector;
use crate::error::{ConfigError, ListenerError, Result};
use crate::factory::Factory;
use crate::notifier::{StateChange, Subscription};
use crate::state::ConnectorState;

/// Whether an I/O error means the TCP connection is gone.
pub fn is_connection_broken(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    ) || super::message_reports_failure(error)
}

// ---------------------------------------------------------------------------
// TcpFactory
// ---------------------------------------------------------------------------

/// Opens TCP connections to a fixed host and port.
#[derive(Debug, Clone)]
pub struct TcpFactory {
    host: String,
    port: u16,
    nodelay: Option<bool>,
}

impl TcpFactory {
    /// Factory for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            nodelay: None,
        }
    }

    /// The configured peer as `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A live connection, split so reads and writes do not contend.
pub struct TcpLink {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer: Option<SocketAddr>,
}

impl TcpLink {
    /// Address of the remote end, if known.
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl fmt::Debug for TcpLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpLink").field("peer", &self.peer).finish()
    }
}

impl Factory for TcpFactory {
    type Resource = TcpLink;
    type Error = io::Error;

    async fn connect(&self) -> io::Result<TcpLink> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        if let Some(nodelay) = self.nodelay {
            stream.set_nodelay(nodelay)?;
        }
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        Ok(TcpLink {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer,
        })
    }

    async fn disconnect(&self, link: Arc<TcpLink>) -> io::Result<()> {
        let mut writer = link.writer.lock().await;
        match writer.shutdown().await {
            // Peer already gone: nothing left to shut down.
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn describe(&self, link: &TcpLink) -> String {
        link.peer
            .map_or_else(|| self.address(), |peer| peer.to_string())
    }
}

// ---------------------------------------------------------------------------
// SelfHealingTcp
// ---------------------------------------------------------------------------

/// Builder for [`SelfHealingTcp`].
pub struct TcpBuilder {
    factory: TcpFactory,
    config: ConfigBuilder<io::Error>,
}

impl TcpBuilder {
    /// Set `TCP_NODELAY` on every connection.
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.factory.nodelay = Some(enabled);
        self
    }

    /// Wait between reconnection attempts.
    pub fn fix_retry_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.fix_retry_delay(delay);
        self
    }

    /// Wait before the first reconnection attempt.
    pub fn recovery_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.recovery_delay(delay);
        self
    }

    /// Give up on shutting down a dead connection after `timeout`.
    ///
    /// A shutdown waits for any write still holding the stream, which may
    /// never finish on a half-open connection.
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.disconnect_timeout(timeout);
        self
    }

    /// Replace the default [`is_connection_broken`] predicate.
    pub fn broken_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&io::Error) -> bool + Send + Sync + 'static,
    {
        self.config = self.config.broken_predicate(predicate);
        self
    }

    /// Apply externally loaded delay settings.
    pub fn settings(mut self, settings: &Settings) -> std::result::Result<Self, ConfigError> {
        self.config = self.config.apply(settings)?;
        Ok(self)
    }

    /// Create the socket. Must be called inside a tokio runtime.
    pub fn build(self) -> SelfHealingTcp {
        SelfHealingTcp {
            connector: Connector::new(self.factory, self.config.build()),
        }
    }
}

/// TCP client that reconnects by itself when the connection drops.
///
/// A read returning end-of-stream is reported as
/// [`io::ErrorKind::UnexpectedEof`] so that a peer hang-up triggers
/// reconnection like any other fatal error.
pub struct SelfHealingTcp {
    connector: Connector<TcpFactory>,
}

impl SelfHealingTcp {
    /// Start building a socket for `host:port`.
    pub fn builder(host: impl Into<String>, port: u16) -> TcpBuilder {
        TcpBuilder {
            factory: TcpFactory::new(host, port),
            config: Config::builder().broken_predicate(is_connection_broken),
        }
    }

    /// Connect for the first time; on failure reconnection continues in the
    /// background.
    pub async fn connect(&self) -> Result<(), io::Error> {
        self.connector.connect().await
    }

    /// Read into `buf`, returning the number of bytes read.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, io::Error> {
        self.connector
            .execute(|link| async move {
                let wanted = buf.len();
                let n = link.reader.lock().await.read(buf).await?;
                if n == 0 && wanted > 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ));
                }
                Ok(n)
            })
            .await
    }

    /// Write all of `data`.
    pub async fn write_all(&self, data: &[u8]) -> Result<(), io::Error> {
        self.connector
            .run(|link| async move { link.writer.lock().await.write_all(data).await })
            .await
    }

    /// Flush buffered output.
    pub async fn flush(&self) -> Result<(), io::Error> {
        self.connector
            .run(|link| async move { link.writer.lock().await.flush().await })
            .await
    }

    /// Address of the currently connected peer.
    pub async fn peer(&self) -> Result<Option<SocketAddr>, io::Error> {
        self.connector
            .execute(|link| async move { Ok(link.peer()) })
            .await
    }

    /// Force a reconnect, e.g. after a protocol-level timeout.
    pub async fn mark_broken(&self) -> Result<(), io::Error> {
        self.connector.mark_broken().await
    }

    /// Register a state-change listener. Listeners must not block; see
    /// [`Connector::subscribe`].
    pub fn subscribe<L>(&self, listener: L) -> Result<Subscription, io::Error>
    where
        L: Fn(StateChange) -> std::result::Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.connector.subscribe(listener)
    }

    /// Current connector state.
    pub fn state(&self) -> ConnectorState {
        self.connector.state()
    }

    /// Close the socket and stop reconnecting.
    pub async fn close(&self) {
        self.connector.close().await;
    }

    /// The underlying connector.
    pub fn connector(&self) -> &Connector<TcpFactory> {
        &self.connector
    }
}

impl fmt::Debug for SelfHealingTcp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfHealingTcp")
            .field("address", &self.connector.factory().address())
            .field("connector", &self.connector)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_kinds() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::NotConnected,
            io::ErrorKind::UnexpectedEof,
        ] {
            assert!(is_connection_broken(&io::Error::from(kind)), "{kind:?}");
        }
        assert!(!is_connection_broken(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_connection_broken(&io::Error::from(io::ErrorKind::InvalidData)));
    }

    #[test]
    fn broken_by_message() {
        assert!(is_connection_broken(&io::Error::other("send failed")));
    }

    #[test]
    fn factory_address() {
        assert_eq!(TcpFactory::new("localhost", 7000).address(), "localhost:7000");
    }
}
