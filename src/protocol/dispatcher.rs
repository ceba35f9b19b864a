//! Dynamic protocol sniffer/dispatcher.
//!
//! # Responsibilities
//! - Buffer a connection's opening bytes (bounded)
//! - Query registered handlers in priority order after every chunk
//! - Hand the connection to the first definite match, replaying the buffer
//! - Close connections no handler recognizes
//!
//! # Design Decisions
//! - Evaluation is re-run from scratch on every chunk; `matches` is a pure
//!   function of the prefix, so any chunking of the same bytes yields the
//!   same decision
//! - The dispatcher resolves each connection exactly once and is never
//!   re-entered afterwards

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;

use crate::config::SocketConfig;
use crate::net::channel::ChannelRegistry;
use crate::net::connection::{Connection, ConnectionId, Transport};
use crate::net::rewind::Rewind;
use crate::observability::metrics::{CONNECTIONS_DISPATCHED, PROTOCOL_VIOLATIONS};
use crate::protocol::{ProtocolError, ProtocolHandler, SniffOutcome};

const INITIAL_SNIFF_CAPACITY: usize = 256;

enum Evaluation {
    Resolved(Arc<dyn ProtocolHandler>),
    Rejected,
    Pending,
}

/// Per-connection first-stage handler deciding which protocol serves a
/// connection.
///
/// One instance is shared by all connections; per-connection state (the
/// sniff buffer) lives on the connection's own task.
pub struct Dispatcher {
    handlers: Arc<Vec<Arc<dyn ProtocolHandler>>>,
    max_sniff_bytes: usize,
    channels: ChannelRegistry,
    socket: SocketConfig,
}

impl Dispatcher {
    pub fn new(
        handlers: Arc<Vec<Arc<dyn ProtocolHandler>>>,
        max_sniff_bytes: usize,
        channels: ChannelRegistry,
        socket: SocketConfig,
    ) -> Self {
        Self {
            handlers,
            max_sniff_bytes,
            channels,
            socket,
        }
    }

    /// Resolve the protocol for one newly accepted connection and run its
    /// pipeline to completion.
    ///
    /// Returns a protocol-violation error when no handler recognizes the
    /// bytes or the sniff bound is exceeded; the caller closes the
    /// connection by dropping it.
    pub async fn dispatch<S>(
        &self,
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        mut stream: S,
    ) -> Result<(), ProtocolError>
    where
        S: Transport + 'static,
    {
        let mut buffer = BytesMut::with_capacity(INITIAL_SNIFF_CAPACITY);

        loop {
            let n = stream.read_buf(&mut buffer).await?;
            if n == 0 {
                // A peer that disconnects mid-sniff is not a violation; only
                // definite rejections and the sniff bound count as one.
                return Err(ProtocolError::EarlyClose);
            }

            match self.evaluate(&buffer) {
                Evaluation::Resolved(handler) => {
                    tracing::debug!(
                        %id,
                        protocol = handler.name(),
                        sniffed = buffer.len(),
                        "protocol resolved"
                    );
                    metrics::counter!(CONNECTIONS_DISPATCHED, "protocol" => handler.name().to_string())
                        .increment(1);

                    let transport: Box<dyn Transport> = Box::new(stream);
                    let conn = Connection::new(
                        id,
                        peer_addr,
                        Rewind::new(buffer.freeze(), transport),
                        self.channels.clone(),
                        self.socket.clone(),
                    );
                    return handler.serve(conn).await;
                }
                Evaluation::Rejected => {
                    metrics::counter!(PROTOCOL_VIOLATIONS).increment(1);
                    return Err(ProtocolError::Unrecognized {
                        sniffed: buffer.len(),
                    });
                }
                Evaluation::Pending => {
                    if buffer.len() >= self.max_sniff_bytes {
                        metrics::counter!(PROTOCOL_VIOLATIONS).increment(1);
                        return Err(ProtocolError::SniffLimitExceeded {
                            limit: self.max_sniff_bytes,
                        });
                    }
                }
            }
        }
    }

    /// Ask every handler, in frozen order, about the current prefix.
    ///
    /// First definite match wins. All definite rejections close the
    /// connection; otherwise we wait for more bytes.
    fn evaluate(&self, prefix: &[u8]) -> Evaluation {
        let mut rejections = 0;
        for handler in self.handlers.iter() {
            match handler.matches(prefix) {
                SniffOutcome::Match => return Evaluation::Resolved(Arc::clone(handler)),
                SniffOutcome::NoMatch => rejections += 1,
                SniffOutcome::Indeterminate => {}
            }
        }
        if rejections == self.handlers.len() {
            Evaluation::Rejected
        } else {
            Evaluation::Pending
        }
    }
}
