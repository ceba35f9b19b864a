//! Raw framed-TCP protocol handler.
//!
//! # Responsibilities
//! - Recognize a configurable magic prefix during sniffing
//! - Register the connection as a tracked channel (closed on server stop)
//! - Hand the replayed stream to the plugged-in service
//!
//! # Design Decisions
//! - This is the attachment point for custom framed protocols (RPC and the
//!   like): each one is a `RawTcpProtocol` with its own magic and codec
//! - Writes go through the tracked `TcpChannel`, so they respect the
//!   configured watermarks and are closed during server stop

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::ReadHalf;

use crate::core::ordered::Ordered;
use crate::net::channel::TcpChannel;
use crate::net::connection::{Connection, TransportStream};
use crate::protocol::{ProtocolError, ProtocolHandler, SniffOutcome};

/// Read side of a raw connection, replayed bytes included.
pub type ChannelReader = ReadHalf<TransportStream>;

/// Application logic plugged into a raw TCP handler.
#[async_trait]
pub trait RawTcpService: Send + Sync {
    /// Serve one connection. `reader` yields the bytes from the very
    /// beginning of the connection (magic included); writes go through the
    /// tracked `channel`.
    async fn serve(&self, channel: TcpChannel, reader: ChannelReader) -> Result<(), ProtocolError>;
}

/// Protocol handler for magic-prefixed raw TCP protocols.
pub struct RawTcpProtocol {
    name: String,
    order: i32,
    magic: Bytes,
    service: Arc<dyn RawTcpService>,
}

impl RawTcpProtocol {
    /// Create a handler recognizing connections that open with `magic`.
    ///
    /// An empty magic matches everything; register such a handler with the
    /// highest order value so it acts as a catch-all.
    pub fn new(
        name: impl Into<String>,
        magic: impl Into<Bytes>,
        service: Arc<dyn RawTcpService>,
    ) -> Self {
        Self {
            name: name.into(),
            order: 300,
            magic: magic.into(),
            service,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl Ordered for RawTcpProtocol {
    fn order(&self) -> i32 {
        self.order
    }
}

#[async_trait]
impl ProtocolHandler for RawTcpProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, prefix: &[u8]) -> SniffOutcome {
        if prefix.len() < self.magic.len() {
            if self.magic.starts_with(prefix) {
                SniffOutcome::Indeterminate
            } else {
                SniffOutcome::NoMatch
            }
        } else if prefix.starts_with(&self.magic) {
            SniffOutcome::Match
        } else {
            SniffOutcome::NoMatch
        }
    }

    async fn serve(&self, conn: Connection) -> Result<(), ProtocolError> {
        let (id, peer_addr, stream, channels, socket) = conn.into_parts();
        let (reader, writer) = tokio::io::split(stream);
        let channel = TcpChannel::spawn(id, peer_addr, writer, &socket, &channels);

        let result = self.service.serve(channel.clone(), reader).await;

        // The channel may already be closed by the service or by stop().
        let _ = channel.close();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocketConfig;
    use crate::net::channel::ChannelRegistry;
    use crate::net::connection::{ConnectionId, Transport};
    use crate::net::rewind::Rewind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Uppercase;

    #[async_trait]
    impl RawTcpService for Uppercase {
        async fn serve(
            &self,
            channel: TcpChannel,
            mut reader: ChannelReader,
        ) -> Result<(), ProtocolError> {
            let mut buf = vec![0u8; 256];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    return Ok(());
                }
                let upper: Vec<u8> = buf[..n].iter().map(|b| b.to_ascii_uppercase()).collect();
                channel
                    .write(Bytes::from(upper))
                    .map_err(|e| ProtocolError::Pipeline(e.to_string()))?;
            }
        }
    }

    #[test]
    fn test_magic_matching_progression() {
        let p = RawTcpProtocol::new("echo", &b"RAW0"[..], Arc::new(Uppercase));
        assert_eq!(p.matches(b"RA"), SniffOutcome::Indeterminate);
        assert_eq!(p.matches(b"RAW0"), SniffOutcome::Match);
        assert_eq!(p.matches(b"RAW0 plus data"), SniffOutcome::Match);
        assert_eq!(p.matches(b"RAX"), SniffOutcome::NoMatch);
    }

    #[tokio::test]
    async fn test_replayed_magic_reaches_the_service_and_channel_is_tracked() {
        let p = RawTcpProtocol::new("echo", &b"RAW0"[..], Arc::new(Uppercase));
        let registry = ChannelRegistry::new();
        let (mut client, server) = tokio::io::duplex(1024);

        let transport: Box<dyn Transport> = Box::new(server);
        let conn = Connection::new(
            ConnectionId::next(),
            None,
            Rewind::new(Bytes::from_static(b"RAW0ab"), transport),
            registry.clone(),
            SocketConfig::default(),
        );

        let serve = tokio::spawn(async move { p.serve(conn).await });

        let mut buf = vec![0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"RAW0AB");
        assert_eq!(registry.len(), 1, "raw connection must be tracked");

        client.shutdown().await.unwrap();
        drop(client);
        serve.await.unwrap().unwrap();
    }
}
