//! End-to-end protocol dispatch over real sockets.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use portmux::core::ordered::Ordered;
use portmux::net::connection::Connection;
use portmux::protocol::{ProtocolError, ProtocolHandler, SniffOutcome};
use portmux::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Handler recognizing a 4-byte magic; serving writes a banner and records
/// the event.
struct BannerProtocol {
    name: &'static str,
    order: i32,
    magic: &'static [u8; 4],
    served: Arc<Mutex<Vec<&'static str>>>,
}

impl Ordered for BannerProtocol {
    fn order(&self) -> i32 {
        self.order
    }
}

#[async_trait]
impl ProtocolHandler for BannerProtocol {
    fn name(&self) -> &str {
        self.name
    }

    fn matches(&self, prefix: &[u8]) -> SniffOutcome {
        if prefix.len() < self.magic.len() {
            if self.magic.starts_with(prefix) {
                SniffOutcome::Indeterminate
            } else {
                SniffOutcome::NoMatch
            }
        } else if prefix.starts_with(self.magic) {
            SniffOutcome::Match
        } else {
            SniffOutcome::NoMatch
        }
    }

    async fn serve(&self, conn: Connection) -> Result<(), ProtocolError> {
        self.served.lock().unwrap().push(self.name);
        let mut stream = conn.into_stream();
        stream.write_all(b"hello from ").await?;
        stream.write_all(self.name.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

fn two_handler_server(served: &Arc<Mutex<Vec<&'static str>>>) -> Server {
    let server = Server::new(common::test_config());
    server
        .add_protocol_handler(Arc::new(BannerProtocol {
            name: "alpha",
            order: 1,
            magic: b"AAAA",
            served: Arc::clone(served),
        }))
        .unwrap();
    server
        .add_protocol_handler(Arc::new(BannerProtocol {
            name: "bravo",
            order: 5,
            magic: b"BBBB",
            served: Arc::clone(served),
        }))
        .unwrap();
    server
}

#[tokio::test]
async fn test_connection_is_routed_past_a_rejecting_higher_priority_handler() {
    let served = Arc::new(Mutex::new(Vec::new()));
    let server = two_handler_server(&served);
    let (addr, task) = common::start(&server).await;

    // alpha (order 1) rejects these bytes; bravo (order 5) matches.
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"BBBB payload").await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"hello from bravo");
    assert_eq!(*served.lock().unwrap(), vec!["bravo"]);

    server.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_byte_at_a_time_client_reaches_the_same_handler() {
    let served = Arc::new(Mutex::new(Vec::new()));
    let server = two_handler_server(&served);
    let (addr, task) = common::start(&server).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    for byte in b"AAAAx" {
        client.write_all(&[*byte]).await.unwrap();
        client.flush().await.unwrap();
    }

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"hello from alpha");
    assert_eq!(*served.lock().unwrap(), vec!["alpha"]);

    server.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unrecognized_bytes_close_the_connection_without_dispatch() {
    let served = Arc::new(Mutex::new(Vec::new()));
    let server = two_handler_server(&served);
    let (addr, task) = common::start(&server).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"ZZZZ").await.unwrap();

    // The server closes the violating connection; the client sees EOF.
    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "violating connection must be closed without a reply");
    assert!(served.lock().unwrap().is_empty());

    server.stop().await.unwrap();
    task.await.unwrap().unwrap();
}
