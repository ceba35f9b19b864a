//! Bounded TCP accept.
//!
//! # Responsibilities
//! - Bind the configured address
//! - Hand out accepted sockets together with a connection slot permit
//! - Cap concurrent connections
//!
//! # Design Decisions
//! - A permit is acquired before accepting, so overload parks in the OS
//!   accept queue instead of being accepted and immediately shed
//! - The permit is held for the connection's lifetime; dropping it frees
//!   the slot, no explicit bookkeeping

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Errors on the bind/accept path; both are fatal to the server.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configured address is unusable.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    /// Accepting on a live listener failed.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}

/// TCP listener capped at `max_connections` concurrent connections.
#[derive(Debug)]
pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
}

impl Listener {
    /// Bind the configured address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        let socket = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let bound = socket.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %bound,
            max_connections = config.max_connections,
            "listener bound"
        );

        Ok(Self {
            socket,
            slots: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    /// Accept one connection once a slot is free.
    ///
    /// The returned permit must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .expect("connection slot semaphore closed");

        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(
            %peer,
            slots_left = self.slots.available_permits(),
            "connection accepted"
        );

        Ok((stream, peer, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Free connection slots right now.
    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }
}

/// A held connection slot; dropping it frees the slot for the next waiter.
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(max_connections: usize) -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections,
        }
    }

    #[tokio::test]
    async fn test_bind_to_ephemeral_port() {
        let listener = Listener::bind(&config(4)).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
        assert_eq!(listener.available_permits(), 4);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let bad = ListenerConfig {
            bind_address: "not an address".to_string(),
            max_connections: 4,
        };
        let err = Listener::bind(&bad).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind(_)));
    }

    #[tokio::test]
    async fn test_accept_waits_until_a_slot_is_free() {
        let listener = Listener::bind(&config(1)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let (_s1, _, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        // The second client connects at the OS level, but accept() must
        // park until the first connection's permit is released.
        let _c2 = TcpStream::connect(addr).await.unwrap();
        let parked = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(parked.is_err(), "accept must wait for a free slot");

        drop(permit);
        let resumed = tokio::time::timeout(Duration::from_secs(2), listener.accept()).await;
        assert!(resumed.is_ok(), "accept must resume once a slot frees up");
    }
}
