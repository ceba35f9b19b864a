//! Multi-protocol server binary.
//!
//! Wires the built-in protocol handlers onto one port: a WebSocket echo, a
//! plain HTTP status endpoint, and a magic-prefixed raw TCP echo. Stops
//! gracefully on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use tokio::io::AsyncReadExt;

use portmux::config::{self, ServerConfig};
use portmux::net::channel::TcpChannel;
use portmux::observability::{logging, metrics};
use portmux::protocol::tcp::{ChannelReader, RawTcpProtocol, RawTcpService};
use portmux::protocol::websocket::{
    AcceptedPayload, MessageHandler, SessionRegistry, WebSocketProtocol, WsPayload,
};
use portmux::protocol::{HttpProtocol, HttpResponse, ProtocolError};
use portmux::server::{HookError, Server, ServerListener};

#[derive(Parser, Debug)]
#[command(name = "portmux", about = "Multi-protocol single-port server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

/// Echoes every complete text or binary message back to its session.
fn echo_handler() -> MessageHandler {
    MessageHandler::Whole(Box::new(|session, payload| {
        match payload {
            WsPayload::Text(text) => session.send_text(text)?,
            WsPayload::Binary(data) => session.send_binary(data)?,
            WsPayload::Pong(_) => {}
        }
        Ok(())
    }))
}

/// Echoes raw bytes back over the tracked channel.
struct RawEcho;

#[async_trait]
impl RawTcpService for RawEcho {
    async fn serve(&self, channel: TcpChannel, mut reader: ChannelReader) -> Result<(), ProtocolError> {
        let mut buf = vec![0u8; 4096];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            channel.writable().await;
            channel
                .write(Bytes::copy_from_slice(&buf[..n]))
                .map_err(|e| ProtocolError::Pipeline(e.to_string()))?;
        }
    }
}

/// Logs lifecycle transitions.
struct LoggingListener;

impl portmux::core::ordered::Ordered for LoggingListener {
    fn order(&self) -> i32 {
        0
    }
}

#[async_trait]
impl ServerListener for LoggingListener {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_server_start(&self, server: &Server) -> Result<(), HookError> {
        tracing::info!(address = ?server.local_addr(), "lifecycle: started");
        Ok(())
    }

    async fn on_server_stop(&self, server: &Server) -> Result<(), HookError> {
        tracing::info!(open_channels = server.channels().len(), "lifecycle: stopping");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability);
    metrics::describe();

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        sniff_max_bytes = config.sniff.max_bytes,
        "Configuration loaded"
    );

    let max_idle_tasks = config.pool.max_idle_tasks;
    let server = Server::new(config);

    server.add_protocol_handler(Arc::new(
        WebSocketProtocol::new()
            .with_pool_size(max_idle_tasks)
            .on_session_open(|session| {
                session.add_message_handler(AcceptedPayload::Any, echo_handler());
            }),
    ))?;
    let status_server = server.clone();
    server.add_protocol_handler(Arc::new(HttpProtocol::new(move |request| {
        match request.path.as_str() {
            "/status" => HttpResponse::json(
                200,
                &serde_json::json!({
                    "state": status_server.state().to_string(),
                    "open_channels": status_server.channels().len(),
                    "ws_sessions": SessionRegistry::global().len(),
                }),
            ),
            _ => HttpResponse::text(404, "not found"),
        }
    })))?;
    server.add_protocol_handler(Arc::new(RawTcpProtocol::new(
        "raw-echo",
        &b"RAW0"[..],
        Arc::new(RawEcho),
    )))?;
    server.add_server_listener(Arc::new(LoggingListener))?;

    let runner = server.clone();
    let running = tokio::spawn(async move { runner.start().await });

    portmux::lifecycle::signals::wait_for_signal().await;
    server.stop().await?;
    running.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
