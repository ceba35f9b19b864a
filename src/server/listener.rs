//! Server lifecycle listener SPI.
//!
//! # Responsibilities
//! - Let embedding applications observe server start and stop
//! - Let them adjust the per-connection socket defaults before the accept
//!   loop begins
//!
//! # Design Decisions
//! - Hook failures are logged and isolated; one broken listener never stops
//!   the others from running, and never aborts start or stop
//! - Listeners run in registry order, so socket overrides applied later win

use async_trait::async_trait;

use crate::config::SocketConfig;
use crate::core::ordered::Ordered;
use crate::core::registry::SharedRegistry;
use crate::server::Server;

/// Error a lifecycle hook may surface; always logged, never fatal.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Observer of server lifecycle events.
///
/// Registered before start and frozen; hooks run in priority order (then
/// registration order among equals).
#[async_trait]
pub trait ServerListener: Ordered + Send + Sync {
    /// Name used when a hook failure is logged.
    fn name(&self) -> &str;

    /// Adjust the socket defaults applied to every accepted connection.
    ///
    /// Runs once, between bind and the first accept.
    fn config(&self, _socket: &mut SocketConfig) {}

    /// Called after bind succeeds, before the accept loop starts.
    async fn on_server_start(&self, _server: &Server) -> Result<(), HookError> {
        Ok(())
    }

    /// Called when the server begins stopping, before tracked channels are
    /// closed.
    async fn on_server_stop(&self, _server: &Server) -> Result<(), HookError> {
        Ok(())
    }
}

/// Registry of lifecycle listeners, frozen at server start.
pub type ListenerRegistry = SharedRegistry<dyn ServerListener>;
