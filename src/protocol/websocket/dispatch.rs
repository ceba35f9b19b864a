//! Message routing from inbound frames to session handlers.
//!
//! # Responsibilities
//! - Wrap each inbound frame as one pooled, recyclable task
//! - Route the frame's payload to the session's matching handlers
//! - Keep close frames away from message handlers
//!
//! # Design Decisions
//! - The task resolves the session from the connection id at run time; a
//!   session that is already gone means the connection closed and the frame
//!   is silently dropped
//! - A handler error is logged and does not close the connection
//! - The task returns to the pool by guard drop, so recycling happens even
//!   when dispatch fails or unwinds

use tokio_tungstenite::tungstenite::Message;

use crate::core::pool::Recyclable;
use crate::net::connection::ConnectionId;
use crate::observability::metrics::WS_MESSAGES_DISPATCHED;
use crate::protocol::websocket::session::{
    MessageHandler, Session, SessionRegistry, WsPayload,
};

/// A recyclable message-routing work unit.
///
/// Neutral state is both fields `None`; `prepare` fills them, `run`
/// consumes the frame.
pub struct MessageTask {
    connection_id: Option<ConnectionId>,
    message: Option<Message>,
}

impl MessageTask {
    pub fn new() -> Self {
        Self {
            connection_id: None,
            message: None,
        }
    }

    pub fn prepare(&mut self, connection_id: ConnectionId, message: Message) {
        self.connection_id = Some(connection_id);
        self.message = Some(message);
    }

    /// Route the prepared frame to the owning session's handlers.
    pub fn run(&mut self) {
        let (Some(id), Some(message)) = (self.connection_id, self.message.take()) else {
            return;
        };
        let Some(session) = SessionRegistry::global().get(id) else {
            // Connection already closed; nothing to dispatch to.
            return;
        };

        metrics::counter!(WS_MESSAGES_DISPATCHED).increment(1);

        match message {
            // Close goes to the handshake closer only, with the frame's own
            // payload; message handlers never see it.
            Message::Close(frame) => {
                if session.send_raw(Message::Close(frame)).is_err() {
                    tracing::debug!(session = %session.id(), "close echo after outbound detach");
                }
            }
            // The transport answers the ping itself; handlers declared for
            // pong/liveness payloads get the ping payload as the
            // pong-response material.
            Message::Ping(payload) => deliver(&session, WsPayload::Pong(payload), true),
            Message::Binary(payload) => deliver(&session, WsPayload::Binary(payload), true),
            Message::Text(payload) => deliver(&session, WsPayload::Text(payload), true),
            // Unsolicited pongs and raw frames carry nothing to route.
            Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

impl Default for MessageTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Recyclable for MessageTask {
    fn reset(&mut self) {
        self.connection_id = None;
        self.message = None;
    }
}

/// Invoke every handler whose declared acceptance covers the payload kind.
fn deliver(session: &Session, payload: WsPayload, last: bool) {
    for entry in session.handler_snapshot() {
        if !entry.accepts.accepts(payload.kind()) {
            continue;
        }
        let result = match &entry.handler {
            MessageHandler::Whole(handler) => handler(session, payload.clone()),
            MessageHandler::Partial(handler) => handler(session, payload.clone(), last),
        };
        if let Err(error) = result {
            tracing::warn!(
                session = %session.id(),
                kind = ?payload.kind(),
                %error,
                "websocket message handler failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::websocket::session::{AcceptedPayload, PayloadKind};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    fn registered_session() -> (Arc<Session>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(ConnectionId::next(), None, tx));
        SessionRegistry::global().insert(Arc::clone(&session));
        (session, rx)
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> MessageHandler {
        MessageHandler::Whole(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    fn run_task(id: ConnectionId, message: Message) {
        let mut task = MessageTask::new();
        task.prepare(id, message);
        task.run();
    }

    #[test]
    fn test_generic_handler_fires_and_mismatched_kind_does_not() {
        let (session, _rx) = registered_session();
        let generic = Arc::new(AtomicUsize::new(0));
        let binary_only = Arc::new(AtomicUsize::new(0));
        session.add_message_handler(AcceptedPayload::Any, counting_handler(generic.clone()));
        session.add_message_handler(
            AcceptedPayload::Only(PayloadKind::Binary),
            counting_handler(binary_only.clone()),
        );

        run_task(session.connection_id(), Message::text("hello"));

        assert_eq!(generic.load(Ordering::SeqCst), 1);
        assert_eq!(binary_only.load(Ordering::SeqCst), 0);
        SessionRegistry::global().remove(session.connection_id());
    }

    #[test]
    fn test_close_frame_never_reaches_message_handlers() {
        let (session, mut rx) = registered_session();
        let calls = Arc::new(AtomicUsize::new(0));
        session.add_message_handler(AcceptedPayload::Any, counting_handler(calls.clone()));

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        };
        run_task(session.connection_id(), Message::Close(Some(frame)));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // The closer got the frame's own payload instead.
        match rx.try_recv().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.reason.as_str(), "bye"),
            other => panic!("expected close echo, got {other:?}"),
        }
        SessionRegistry::global().remove(session.connection_id());
    }

    #[test]
    fn test_ping_payload_goes_to_pong_handlers() {
        let (session, _rx) = registered_session();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.add_message_handler(
            AcceptedPayload::Only(PayloadKind::Pong),
            MessageHandler::Whole(Box::new(move |_, payload| {
                if let WsPayload::Pong(bytes) = payload {
                    sink.lock().unwrap().push(bytes);
                }
                Ok(())
            })),
        );
        let text_calls = Arc::new(AtomicUsize::new(0));
        session.add_message_handler(
            AcceptedPayload::Only(PayloadKind::Text),
            counting_handler(text_calls.clone()),
        );

        run_task(
            session.connection_id(),
            Message::Ping(Bytes::from_static(b"alive?")),
        );

        assert_eq!(seen.lock().unwrap().as_slice(), [Bytes::from_static(b"alive?")]);
        assert_eq!(text_calls.load(Ordering::SeqCst), 0);
        SessionRegistry::global().remove(session.connection_id());
    }

    #[test]
    fn test_partial_handlers_receive_the_final_flag() {
        let (session, _rx) = registered_session();
        let flags = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = flags.clone();
        session.add_message_handler(
            AcceptedPayload::Only(PayloadKind::Text),
            MessageHandler::Partial(Box::new(move |_, _, last| {
                sink.lock().unwrap().push(last);
                Ok(())
            })),
        );

        run_task(session.connection_id(), Message::text("whole message"));

        assert_eq!(flags.lock().unwrap().as_slice(), [true]);
        SessionRegistry::global().remove(session.connection_id());
    }

    #[test]
    fn test_handler_error_does_not_stop_later_handlers() {
        let (session, _rx) = registered_session();
        session.add_message_handler(
            AcceptedPayload::Any,
            MessageHandler::Whole(Box::new(|_, _| Err("boom".into()))),
        );
        let after = Arc::new(AtomicUsize::new(0));
        session.add_message_handler(AcceptedPayload::Any, counting_handler(after.clone()));

        run_task(session.connection_id(), Message::text("still delivered"));

        assert_eq!(after.load(Ordering::SeqCst), 1);
        SessionRegistry::global().remove(session.connection_id());
    }

    #[test]
    fn test_frame_for_unknown_connection_is_dropped() {
        // Never registered; run must be a no-op rather than a panic.
        run_task(ConnectionId::next(), Message::text("ghost"));
    }
}
