//! Protocol handler SPI and the dynamic per-connection dispatcher.
//!
//! # Data Flow
//! ```text
//! accepted socket
//!     → dispatcher.rs (buffer opening bytes, ask handlers in order)
//!     → first definite match wins
//!     → matched handler's pipeline (serve), sniffed bytes replayed
//! ```
//!
//! # Design Decisions
//! - A handler answers `Match`, `NoMatch`, or `Indeterminate` over the byte
//!   prefix; `Indeterminate` means "not enough bytes yet", distinct from a
//!   definite rejection
//! - "Replacing the dispatcher in the processing chain" is modeled as an
//!   ownership handoff: the matched handler receives the connection with the
//!   sniff buffer queued for replay
//! - Handlers are registered before start and frozen; dispatch never sees a
//!   mutating registry

pub mod dispatcher;
pub mod http;
pub mod tcp;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::ordered::Ordered;
use crate::core::registry::SharedRegistry;
use crate::net::connection::Connection;

pub use dispatcher::Dispatcher;
pub use http::{HttpProtocol, HttpRequest, HttpResponse};
pub use tcp::{ChannelReader, RawTcpProtocol, RawTcpService};
pub use websocket::WebSocketProtocol;

/// Verdict a protocol handler gives for a connection's opening bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffOutcome {
    /// The prefix definitely belongs to this protocol.
    Match,
    /// The prefix definitely does not belong to this protocol.
    NoMatch,
    /// Not enough bytes yet to decide either way.
    Indeterminate,
}

/// Errors on the protocol dispatch path.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Every registered handler rejected the opening bytes.
    #[error("no registered protocol recognized the opening bytes ({sniffed} bytes sniffed)")]
    Unrecognized { sniffed: usize },

    /// The sniff buffer hit its bound without a decision.
    #[error("sniff buffer exceeded {limit} bytes without a protocol decision")]
    SniffLimitExceeded { limit: usize },

    /// The peer closed before a protocol could be decided.
    #[error("connection closed before a protocol was decided")]
    EarlyClose,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A pipeline failed after the protocol was resolved.
    #[error("pipeline failure: {0}")]
    Pipeline(String),
}

impl ProtocolError {
    /// Whether this error is a protocol violation by the peer (close the
    /// offending connection, affect nothing else).
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::Unrecognized { .. } | ProtocolError::SniffLimitExceeded { .. }
        )
    }
}

/// A pluggable implementation of one wire protocol.
///
/// Implementations are registered on the server before start; the registry
/// order (priority, then registration index) decides precedence among
/// handlers that could match the same prefix.
#[async_trait]
pub trait ProtocolHandler: Ordered + Send + Sync {
    /// Name used in startup diagnostics.
    fn name(&self) -> &str;

    /// Inspect the connection's opening bytes.
    ///
    /// Called again with a longer prefix every time more bytes arrive, until
    /// the handler (or another one) gives a definite answer. Must be a pure
    /// function of the prefix.
    fn matches(&self, prefix: &[u8]) -> SniffOutcome;

    /// Serve the connection. The sniffed bytes are replayed first, so the
    /// pipeline sees the byte stream from its very beginning.
    async fn serve(&self, conn: Connection) -> Result<(), ProtocolError>;
}

/// Registry of protocol handlers, frozen at server start.
pub type ProtocolRegistry = SharedRegistry<dyn ProtocolHandler>;

/// Ordered handler names, for the startup diagnostics line.
pub fn handler_names(handlers: &[Arc<dyn ProtocolHandler>]) -> Vec<String> {
    handlers.iter().map(|h| h.name().to_string()).collect()
}
