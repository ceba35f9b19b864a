//! Server orchestrator.
//!
//! # Data Flow
//! ```text
//! ServerConfig + registered handlers/listeners
//!     → start(): bind → socket defaults + listener overrides
//!              → freeze registries → start hooks → accept loop
//!     → per accepted socket: spawn dispatcher task
//!     → stop(): stop hooks → shutdown signal → close tracked channels
//! ```
//!
//! # Design Decisions
//! - `Server` is a cheap clone-able handle over shared state, so lifecycle
//!   hooks and signal handlers can act on the same server the accept loop
//!   runs on
//! - Bind and accept failures are fatal; the server moves to Failed and
//!   never retries
//! - Lifecycle hook failures are logged and isolated, for start and stop
//!   alike; a broken listener never takes the server down

pub mod listener;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;

use thiserror::Error;

use crate::config::{ServerConfig, SocketConfig};
use crate::core::ordered::RegistryFrozen;
use crate::lifecycle::Shutdown;
use crate::net::channel::ChannelRegistry;
use crate::net::connection::ConnectionId;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::metrics::CONNECTIONS_ACCEPTED;
use crate::protocol::{handler_names, Dispatcher, ProtocolHandler, ProtocolRegistry};
use crate::server::state::ServerState;

pub use listener::{HookError, ListenerRegistry, ServerListener};

/// Errors surfaced by the server lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server was asked to start from a state that does not allow it.
    #[error("cannot start a {0} server")]
    AlreadyStarted(ServerState),

    /// Bind or accept failed; fatal, the server will not retry.
    #[error("listener failure: {0}")]
    Listener(#[from] ListenerError),

    /// Registration attempted after the registries were frozen at start.
    #[error(transparent)]
    RegistryFrozen(#[from] RegistryFrozen),

    /// One or more tracked channels failed to close during stop.
    #[error("shutdown incomplete: {failed} tracked channel(s) failed to close")]
    Shutdown { failed: usize },
}

struct ServerInner {
    config: ServerConfig,
    protocols: ProtocolRegistry,
    listeners: ListenerRegistry,
    channels: ChannelRegistry,
    shutdown: Shutdown,
    state: Mutex<ServerState>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// Multi-protocol single-port server.
///
/// Register protocol handlers and lifecycle listeners, then `start()`.
/// The handle is cheap to clone; `stop()` may be called from any clone.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                protocols: ProtocolRegistry::new(),
                listeners: ListenerRegistry::new(),
                channels: ChannelRegistry::new(),
                shutdown: Shutdown::new(),
                state: Mutex::new(ServerState::Unstarted),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Register a protocol handler. Rejected once the server has started.
    pub fn add_protocol_handler(
        &self,
        handler: Arc<dyn ProtocolHandler>,
    ) -> Result<(), ServerError> {
        self.inner.protocols.register(handler)?;
        Ok(())
    }

    /// Register a lifecycle listener. Rejected once the server has started.
    pub fn add_server_listener(
        &self,
        listener: Arc<dyn ServerListener>,
    ) -> Result<(), ServerError> {
        self.inner.listeners.register(listener)?;
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.inner.state.lock().expect("state mutex poisoned")
    }

    /// The bound address, once the server has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().expect("state mutex poisoned")
    }

    /// Registry of long-lived channels opened by raw TCP pipelines.
    pub fn channels(&self) -> &ChannelRegistry {
        &self.inner.channels
    }

    fn transition(&self, to: ServerState) -> Result<ServerState, ServerState> {
        let mut state = self.inner.state.lock().expect("state mutex poisoned");
        if state.can_transition_to(to) {
            let from = *state;
            *state = to;
            Ok(from)
        } else {
            Err(*state)
        }
    }

    /// Bind, run start hooks, and serve connections until `stop()`.
    ///
    /// Returns once the shutdown signal fires, or with a fatal error if
    /// bind or accept fails.
    pub async fn start(&self) -> Result<(), ServerError> {
        if let Err(state) = self.transition(ServerState::Starting) {
            return Err(ServerError::AlreadyStarted(state));
        }

        let listener = match Listener::bind(&self.inner.config.listener).await {
            Ok(listener) => listener,
            Err(error) => {
                let _ = self.transition(ServerState::Failed);
                tracing::error!(%error, "server failed to bind");
                return Err(error.into());
            }
        };
        let local_addr = listener.local_addr().ok();
        *self.inner.local_addr.lock().expect("state mutex poisoned") = local_addr;

        // Socket defaults first, then listener overrides in priority order.
        let lifecycle = self.inner.listeners.freeze();
        let mut socket = self.inner.config.socket.clone();
        for hook in lifecycle.iter() {
            hook.config(&mut socket);
        }

        let handlers = self.inner.protocols.freeze();
        if handlers.is_empty() {
            tracing::warn!("no protocol handlers registered; every connection will be rejected");
        }

        for hook in lifecycle.iter() {
            if let Err(error) = hook.on_server_start(self).await {
                tracing::error!(listener = hook.name(), %error, "start hook failed");
            }
        }

        tracing::info!(
            name = "portmux",
            version = env!("CARGO_PKG_VERSION"),
            address = ?local_addr,
            pid = std::process::id(),
            protocols = ?handler_names(&handlers),
            os = std::env::consts::OS,
            "server started"
        );

        // Subscribe before publishing Running: stop() only triggers the
        // signal once the Running transition succeeds, so the accept loop
        // cannot miss it.
        let mut shutdown = self.inner.shutdown.subscribe();
        let _ = self.transition(ServerState::Running);

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&handlers),
            self.inner.config.sniff.max_bytes,
            self.inner.channels.clone(),
            socket.clone(),
        ));

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("accept loop stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(error) => {
                            let _ = self.transition(ServerState::Failed);
                            tracing::error!(%error, "accept failed");
                            return Err(error.into());
                        }
                    };
                    metrics::counter!(CONNECTIONS_ACCEPTED).increment(1);

                    if socket.nodelay {
                        if let Err(error) = stream.set_nodelay(true) {
                            tracing::debug!(%error, "set_nodelay failed");
                        }
                    }

                    let id = ConnectionId::next();
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(async move {
                        let result = dispatcher.dispatch(id, Some(peer_addr), stream).await;
                        match result {
                            Ok(()) => tracing::debug!(%id, "connection finished"),
                            Err(error) if error.is_violation() => {
                                tracing::warn!(%id, %peer_addr, %error, "protocol violation")
                            }
                            Err(error) => tracing::warn!(%id, %error, "connection failed"),
                        }
                        drop(permit);
                    });
                }
            }
        }
    }

    /// Stop the server: run stop hooks, signal shutdown, close every
    /// tracked channel.
    ///
    /// Idempotent once stopping has begun; a stop racing a start in flight
    /// waits for startup to settle and then proceeds. Hook failures are logged and
    /// never abort the sequence; channel-close failures are aggregated into
    /// the returned error.
    pub async fn stop(&self) -> Result<(), ServerError> {
        loop {
            match self.transition(ServerState::Stopping) {
                Ok(_) => break,
                // Startup in flight; wait for it to reach Running (or fail)
                // rather than leaving the server running after stop().
                Err(ServerState::Starting) => {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
                // Already stopping, stopped, failed, or never ran.
                Err(_) => return Ok(()),
            }
        }
        tracing::info!("server stopping");

        if let Some(lifecycle) = self.inner.listeners.snapshot() {
            for hook in lifecycle.iter() {
                if let Err(error) = hook.on_server_stop(self).await {
                    tracing::error!(listener = hook.name(), %error, "stop hook failed");
                }
            }
        }

        self.inner.shutdown.trigger();

        let failed = self.inner.channels.close_all();
        for id in &failed {
            tracing::error!(%id, "tracked channel failed to close");
        }

        let _ = self.transition(ServerState::Stopped);
        tracing::info!("server stopped");

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ServerError::Shutdown {
                failed: failed.len(),
            })
        }
    }

    /// Effective socket defaults from config, before listener overrides.
    pub fn socket_config(&self) -> SocketConfig {
        self.inner.config.socket.clone()
    }
}
