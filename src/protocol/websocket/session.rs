//! WebSocket sessions and the process-wide session table.
//!
//! # Responsibilities
//! - Hold per-connection state created at protocol upgrade
//! - Keep the set of registered message handlers for a session
//! - Map connection identity → session for the message-routing task
//!
//! # Design Decisions
//! - The table is a dashmap keyed by connection id: entries are only ever
//!   touched by the connection's own task, but insertion/removal must be
//!   safe from any task
//! - A handler's accepted payload kind is explicit registration metadata,
//!   not runtime type inspection
//! - Handler entries are `Arc`s so dispatch iterates a snapshot and a
//!   handler may register or remove handlers without deadlocking

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use uuid::Uuid;

use crate::net::connection::ConnectionId;

/// Error returned when sending on a session whose connection is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClosed;

impl std::fmt::Display for SessionClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "websocket session is closed")
    }
}

impl std::error::Error for SessionClosed {}

/// An inbound payload delivered to message handlers.
#[derive(Debug, Clone)]
pub enum WsPayload {
    /// A complete text message.
    Text(Utf8Bytes),
    /// A complete binary message.
    Binary(Bytes),
    /// The payload of a ping, delivered as the pong-response material.
    Pong(Bytes),
}

impl WsPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            WsPayload::Text(_) => PayloadKind::Text,
            WsPayload::Binary(_) => PayloadKind::Binary,
            WsPayload::Pong(_) => PayloadKind::Pong,
        }
    }
}

/// Payload kind a handler declares at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Text,
    Binary,
    Pong,
}

/// What a registered handler accepts.
///
/// `Any` plays the role of an unspecified/generic declaration: it matches
/// every payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptedPayload {
    Any,
    Only(PayloadKind),
}

impl AcceptedPayload {
    pub fn accepts(&self, kind: PayloadKind) -> bool {
        match self {
            AcceptedPayload::Any => true,
            AcceptedPayload::Only(accepted) => *accepted == kind,
        }
    }
}

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A message handler's callback shape.
pub enum MessageHandler {
    /// Invoked once per complete message.
    Whole(Box<dyn Fn(&Session, WsPayload) -> HandlerResult + Send + Sync>),
    /// Invoked per fragment, with the final-fragment flag.
    Partial(Box<dyn Fn(&Session, WsPayload, bool) -> HandlerResult + Send + Sync>),
}

/// Identity of a registered handler within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

pub(crate) struct HandlerEntry {
    pub(crate) id: HandlerId,
    pub(crate) accepts: AcceptedPayload,
    pub(crate) handler: MessageHandler,
}

/// Per-connection WebSocket state, created on protocol upgrade and removed
/// when the connection closes.
pub struct Session {
    id: Uuid,
    connection_id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    handlers: Mutex<Vec<Arc<HandlerEntry>>>,
    next_handler_id: AtomicU64,
}

impl Session {
    pub(crate) fn new(
        connection_id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection_id,
            peer_addr,
            outbound: Mutex::new(Some(outbound)),
            handlers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Register a message handler; the returned id is its identity.
    pub fn add_message_handler(&self, accepts: AcceptedPayload, handler: MessageHandler) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .expect("session handler mutex poisoned")
            .push(Arc::new(HandlerEntry { id, accepts, handler }));
        id
    }

    /// Remove a handler by identity. Returns whether it was present.
    pub fn remove_message_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().expect("session handler mutex poisoned");
        let before = handlers.len();
        handlers.retain(|entry| entry.id != id);
        handlers.len() != before
    }

    pub(crate) fn handler_snapshot(&self) -> Vec<Arc<HandlerEntry>> {
        self.handlers
            .lock()
            .expect("session handler mutex poisoned")
            .clone()
    }

    pub fn send_text(&self, text: impl Into<Utf8Bytes>) -> Result<(), SessionClosed> {
        self.send_raw(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), SessionClosed> {
        self.send_raw(Message::Binary(data.into()))
    }

    pub(crate) fn send_raw(&self, message: Message) -> Result<(), SessionClosed> {
        let outbound = self.outbound.lock().expect("session outbound mutex poisoned");
        match outbound.as_ref() {
            Some(tx) => tx.send(message).map_err(|_| SessionClosed),
            None => Err(SessionClosed),
        }
    }

    /// Detach the outbound queue; subsequent sends fail with `SessionClosed`.
    pub(crate) fn detach_outbound(&self) {
        self.outbound
            .lock()
            .expect("session outbound mutex poisoned")
            .take();
    }

    pub fn is_open(&self) -> bool {
        self.outbound
            .lock()
            .expect("session outbound mutex poisoned")
            .is_some()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

/// Process-wide session table keyed by connection identity.
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Arc<Session>>,
}

static GLOBAL_SESSIONS: LazyLock<SessionRegistry> = LazyLock::new(|| SessionRegistry {
    sessions: DashMap::new(),
});

impl SessionRegistry {
    pub fn global() -> &'static SessionRegistry {
        &GLOBAL_SESSIONS
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.connection_id(), session);
    }

    /// Remove a closed connection's session. A dangling entry is a defect.
    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
