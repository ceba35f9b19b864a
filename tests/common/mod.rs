//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use portmux::config::ServerConfig;
use portmux::server::state::ServerState;
use portmux::server::{Server, ServerError};
use tokio::task::JoinHandle;

/// Config bound to an ephemeral localhost port.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config
}

/// Run the server in the background and wait until it accepts connections.
pub async fn start(server: &Server) -> (SocketAddr, JoinHandle<Result<(), ServerError>>) {
    let runner = server.clone();
    let task = tokio::spawn(async move { runner.start().await });

    for _ in 0..200 {
        if server.state() == ServerState::Running {
            if let Some(addr) = server.local_addr() {
                return (addr, task);
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server did not reach Running");
}

/// Wait until `predicate` holds, with a bounded number of retries.
#[allow(dead_code)]
pub async fn eventually(mut predicate: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
