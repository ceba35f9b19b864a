//! WebSocket protocol handler.
//!
//! # Data Flow
//! ```text
//! sniffed upgrade request
//!     → handshake (tokio-tungstenite, sniffed bytes replayed)
//!     → Session created, inserted into the process-wide table
//!     → inbound frame → pooled MessageTask → session handlers
//!     → connection close → session removed
//! ```
//!
//! # Design Decisions
//! - `matches` stays `Indeterminate` until the whole header block arrives,
//!   then answers definitively from the Upgrade header; registered ahead of
//!   the plain HTTP handler, order decides upgrades
//! - Outbound frames go through an unbounded queue to a writer task, so
//!   handlers can send from synchronous dispatch code

pub mod dispatch;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use crate::core::ordered::Ordered;
use crate::core::pool::TaskPool;
use crate::net::connection::{Connection, TransportStream};
use crate::observability::metrics::WS_SESSIONS_OPENED;
use crate::protocol::{ProtocolError, ProtocolHandler, SniffOutcome};

pub use dispatch::MessageTask;
pub use session::{
    AcceptedPayload, HandlerId, MessageHandler, PayloadKind, Session, SessionClosed,
    SessionRegistry, WsPayload,
};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Default priority; ahead of the plain HTTP handler so upgrades win.
pub const DEFAULT_WEBSOCKET_ORDER: i32 = 100;

/// Callback invoked when a session has been created, before any frame is
/// dispatched. This is where applications register message handlers.
pub type OnSessionOpen = dyn Fn(&Arc<Session>) + Send + Sync;

/// Protocol handler for WebSocket upgrade connections.
pub struct WebSocketProtocol {
    order: i32,
    on_open: Option<Arc<OnSessionOpen>>,
    tasks: TaskPool<MessageTask>,
}

impl WebSocketProtocol {
    pub fn new() -> Self {
        Self {
            order: DEFAULT_WEBSOCKET_ORDER,
            on_open: None,
            tasks: TaskPool::new(256, MessageTask::new),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Cap on idle recycled message tasks.
    pub fn with_pool_size(mut self, max_idle: usize) -> Self {
        self.tasks = TaskPool::new(max_idle, MessageTask::new);
        self
    }

    pub fn on_session_open<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Arc<Session>) + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(callback));
        self
    }
}

impl Default for WebSocketProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Ordered for WebSocketProtocol {
    fn order(&self) -> i32 {
        self.order
    }
}

#[async_trait]
impl ProtocolHandler for WebSocketProtocol {
    fn name(&self) -> &str {
        "websocket"
    }

    fn matches(&self, prefix: &[u8]) -> SniffOutcome {
        const GET: &[u8] = b"GET ";
        let probe = &prefix[..prefix.len().min(GET.len())];
        if !GET.starts_with(probe) {
            return SniffOutcome::NoMatch;
        }
        let Some(end) = find_terminator(prefix) else {
            return SniffOutcome::Indeterminate;
        };
        if has_websocket_upgrade(&prefix[..end]) {
            SniffOutcome::Match
        } else {
            SniffOutcome::NoMatch
        }
    }

    async fn serve(&self, conn: Connection) -> Result<(), ProtocolError> {
        let (id, peer_addr, stream, _channels, _socket) = conn.into_parts();

        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (sink, mut source) = ws.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(id, peer_addr, tx));
        SessionRegistry::global().insert(Arc::clone(&session));
        metrics::counter!(WS_SESSIONS_OPENED).increment(1);
        tracing::debug!(%id, session = %session.id(), "websocket session opened");

        if let Some(on_open) = &self.on_open {
            on_open(&session);
        }

        let writer = tokio::spawn(write_loop(sink, rx));

        let mut result = Ok(());
        while let Some(frame) = source.next().await {
            match frame {
                Ok(message) => {
                    let closing = matches!(message, Message::Close(_));
                    // One pooled task per inbound frame; the guard drop
                    // recycles it no matter how dispatch went.
                    let mut task = self.tasks.acquire();
                    task.prepare(id, message);
                    task.run();
                    drop(task);
                    if closing {
                        break;
                    }
                }
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                Err(error) => {
                    // Framing violation; this connection must close.
                    result = Err(ProtocolError::WebSocket(error));
                    break;
                }
            }
        }

        SessionRegistry::global().remove(id);
        session.detach_outbound();
        let _ = writer.await;
        tracing::debug!(%id, session = %session.id(), "websocket session closed");
        result
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TransportStream>, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() {
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

fn find_terminator(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Case-insensitive check for `Upgrade: websocket` in a header block.
fn has_websocket_upgrade(head: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    text.split("\r\n").skip(1).any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.trim().eq_ignore_ascii_case("websocket")
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE: &[u8] = b"GET /chat HTTP/1.1\r\n\
Host: localhost\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn test_upgrade_request_matches_once_headers_complete() {
        let p = WebSocketProtocol::new();
        assert_eq!(p.matches(b"GE"), SniffOutcome::Indeterminate);
        assert_eq!(p.matches(&UPGRADE[..20]), SniffOutcome::Indeterminate);
        assert_eq!(p.matches(UPGRADE), SniffOutcome::Match);
    }

    #[test]
    fn test_plain_get_is_rejected_at_header_end() {
        let p = WebSocketProtocol::new();
        let plain = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(p.matches(&plain[..10]), SniffOutcome::Indeterminate);
        assert_eq!(p.matches(plain), SniffOutcome::NoMatch);
    }

    #[test]
    fn test_non_get_bytes_are_rejected_immediately() {
        let p = WebSocketProtocol::new();
        assert_eq!(p.matches(b"POST /"), SniffOutcome::NoMatch);
        assert_eq!(p.matches(b"\x16\x03"), SniffOutcome::NoMatch);
    }

    #[test]
    fn test_upgrade_header_detection_is_case_insensitive() {
        let head = b"GET / HTTP/1.1\r\nUPGRADE: WebSocket\r\nConnection: upgrade";
        assert!(has_websocket_upgrade(head));
        let no_upgrade = b"GET / HTTP/1.1\r\nHost: x";
        assert!(!has_websocket_upgrade(no_upgrade));
    }
}
