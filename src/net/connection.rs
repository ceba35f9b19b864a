//! Connection identity and the handle passed to protocol pipelines.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing and registries
//! - Bundle the rewound transport with the server context a pipeline needs
//!
//! # Design Decisions
//! - IDs come from a global atomic counter; relaxed ordering is sufficient
//!   since we only need uniqueness, not synchronization
//! - The transport is boxed so pipelines and tests run over any stream
//!   (TCP sockets in production, in-memory duplex pipes in tests)

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::SocketConfig;
use crate::net::channel::ChannelRegistry;
use crate::net::rewind::Rewind;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Byte transport a protocol pipeline can be driven over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// The rewound stream handed to a matched protocol handler.
pub type TransportStream = Rewind<Box<dyn Transport>>;

/// A resolved connection, handed to the matched handler's pipeline.
///
/// Owns the transport (with the sniffed bytes queued for replay) plus the
/// server context pipelines need: the tracked-channel registry and the
/// effective socket options.
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    stream: TransportStream,
    channels: ChannelRegistry,
    socket: SocketConfig,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        stream: TransportStream,
        channels: ChannelRegistry,
        socket: SocketConfig,
    ) -> Self {
        Self {
            id,
            peer_addr,
            stream,
            channels,
            socket,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn socket_config(&self) -> &SocketConfig {
        &self.socket
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Give up the handle, keeping only the transport.
    pub fn into_stream(self) -> TransportStream {
        self.stream
    }

    /// Split into the transport and the context pieces.
    pub fn into_parts(self) -> (ConnectionId, Option<SocketAddr>, TransportStream, ChannelRegistry, SocketConfig) {
        (self.id, self.peer_addr, self.stream, self.channels, self.socket)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique_and_monotonic() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_display_format() {
        let id = ConnectionId::next();
        assert_eq!(format!("{id}"), format!("conn-{}", id.as_u64()));
    }
}
