//! Metric names and registration.
//!
//! # Responsibilities
//! - Define the metric names used across the dispatch path
//! - Describe them once at startup
//!
//! # Design Decisions
//! - Uses the `metrics` facade only; exporter wiring is the embedding
//!   application's concern
//! - Updates are cheap atomic increments on the hot path

/// Connections accepted by the listener.
pub const CONNECTIONS_ACCEPTED: &str = "portmux_connections_accepted_total";

/// Connections resolved to a protocol, labeled by protocol name.
pub const CONNECTIONS_DISPATCHED: &str = "portmux_connections_dispatched_total";

/// Connections closed as protocol violations (no match / sniff bound).
pub const PROTOCOL_VIOLATIONS: &str = "portmux_protocol_violations_total";

/// WebSocket sessions created.
pub const WS_SESSIONS_OPENED: &str = "portmux_ws_sessions_opened_total";

/// WebSocket frames routed through the message dispatch path.
pub const WS_MESSAGES_DISPATCHED: &str = "portmux_ws_messages_dispatched_total";

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(CONNECTIONS_ACCEPTED, "Connections accepted by the listener");
    metrics::describe_counter!(
        CONNECTIONS_DISPATCHED,
        "Connections resolved to a protocol handler"
    );
    metrics::describe_counter!(
        PROTOCOL_VIOLATIONS,
        "Connections closed because no protocol matched"
    );
    metrics::describe_counter!(WS_SESSIONS_OPENED, "WebSocket sessions created");
    metrics::describe_counter!(
        WS_MESSAGES_DISPATCHED,
        "WebSocket frames routed to message handlers"
    );
}
