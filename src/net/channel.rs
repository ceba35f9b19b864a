//! Tracked long-lived channels with write backpressure.
//!
//! # Responsibilities
//! - Queue outbound bytes and write them from a dedicated writer task
//! - Account pending bytes against the configured watermarks and expose a
//!   writability signal callers must respect
//! - Track every long-lived channel in a process-wide registry so server
//!   stop can close them all
//!
//! # Data Flow
//! ```text
//! TcpChannel::write ──▶ mpsc queue ──▶ writer task ──▶ socket
//!         │                                  │
//!         └── pending += len                 └── pending -= len
//!             (≥ high → unwritable)              (≤ low → writable)
//! ```
//!
//! # Design Decisions
//! - The writer performs at most `write_spin_count` consecutive writes
//!   before yielding, so one busy channel cannot starve its worker
//! - With `auto_close` set, a failed write tears the channel down; teardown
//!   drops the unflushed queue and restores the writability signal so no
//!   caller stays parked on a dead channel
//! - A closed channel deregisters itself; a dangling registry entry is a
//!   defect

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use crate::config::SocketConfig;
use crate::net::connection::ConnectionId;

/// Error returned when writing to or closing a channel that is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelClosed;

impl std::fmt::Display for ChannelClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel is closed")
    }
}

impl std::error::Error for ChannelClosed {}

enum WriteCommand {
    Data(Bytes),
    Shutdown,
}

/// Process-wide registry of tracked channels, keyed by connection identity.
///
/// Entries are only ever touched by the task owning the connection; the map
/// itself is safe for concurrent insertion and removal.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    inner: Arc<DashMap<ConnectionId, TcpChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, channel: TcpChannel) {
        self.inner.insert(channel.id(), channel);
    }

    fn remove(&self, id: ConnectionId) {
        self.inner.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, id: ConnectionId) -> Option<TcpChannel> {
        self.inner.get(&id).map(|entry| entry.value().clone())
    }

    /// Close every tracked channel, returning the ids that failed to close.
    ///
    /// Close is attempted for all channels even if some fail.
    pub fn close_all(&self) -> Vec<ConnectionId> {
        let channels: Vec<TcpChannel> = self.inner.iter().map(|e| e.value().clone()).collect();
        let mut failed = Vec::new();
        for channel in channels {
            if channel.close().is_err() {
                failed.push(channel.id());
            }
        }
        failed
    }
}

struct ChannelShared {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    tx: mpsc::UnboundedSender<WriteCommand>,
    pending: AtomicUsize,
    writable: watch::Sender<bool>,
    closed: AtomicBool,
    high: usize,
    low: usize,
}

/// Handle to a tracked, watermark-backpressured outbound channel.
///
/// Cheap to clone; all clones share the writer task.
#[derive(Clone)]
pub struct TcpChannel {
    shared: Arc<ChannelShared>,
}

impl TcpChannel {
    /// Register a channel over `writer` and spawn its writer task.
    pub fn spawn<W>(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        writer: W,
        socket: &SocketConfig,
        registry: &ChannelRegistry,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (writable, _) = watch::channel(true);
        let shared = Arc::new(ChannelShared {
            id,
            peer_addr,
            tx,
            pending: AtomicUsize::new(0),
            writable,
            closed: AtomicBool::new(false),
            high: socket.write_buffer_high,
            low: socket.write_buffer_low,
        });

        let channel = Self {
            shared: Arc::clone(&shared),
        };
        registry.insert(channel.clone());

        let spin = socket.write_spin_count;
        let auto_close = socket.auto_close;
        let registry = registry.clone();
        tokio::spawn(write_loop(shared, writer, rx, spin, auto_close, registry));

        channel
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    /// Queue bytes for writing.
    ///
    /// Callers must respect `is_writable` / `writable` rather than
    /// unconditionally enqueueing; the queue itself is unbounded.
    pub fn write(&self, data: Bytes) -> Result<(), ChannelClosed> {
        if self.is_closed() {
            return Err(ChannelClosed);
        }
        let len = data.len();
        let pending = self.shared.pending.fetch_add(len, Ordering::SeqCst) + len;
        if pending >= self.shared.high {
            self.shared.writable.send_replace(false);
        }
        self.shared
            .tx
            .send(WriteCommand::Data(data))
            .map_err(|_| ChannelClosed)
    }

    /// Current writability per the configured watermarks.
    pub fn is_writable(&self) -> bool {
        *self.shared.writable.borrow()
    }

    /// Pending outbound bytes not yet flushed to the socket.
    pub fn pending_bytes(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Wait until the channel is writable again.
    ///
    /// Also completes once the channel closes, so callers parked here are
    /// never stranded by a teardown.
    pub async fn writable(&self) {
        let mut rx = self.shared.writable.subscribe();
        while !*rx.borrow_and_update() {
            if self.is_closed() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Close the channel. Idempotent; queued bytes ahead of the close are
    /// still flushed.
    pub fn close(&self) -> Result<(), ChannelClosed> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared
            .tx
            .send(WriteCommand::Shutdown)
            .map_err(|_| ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

async fn write_loop<W>(
    shared: Arc<ChannelShared>,
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
    spin: usize,
    auto_close: bool,
    registry: ChannelRegistry,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut consecutive = 0usize;
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Data(data) => {
                let len = data.len();
                let result = writer.write_all(&data).await;
                let pending = shared.pending.fetch_sub(len, Ordering::SeqCst) - len;
                if pending <= shared.low {
                    shared.writable.send_replace(true);
                }
                if let Err(error) = result {
                    tracing::warn!(id = %shared.id, %error, "channel write failed");
                    if auto_close {
                        break;
                    }
                }
                consecutive += 1;
                if consecutive >= spin {
                    consecutive = 0;
                    tokio::task::yield_now().await;
                }
            }
            WriteCommand::Shutdown => break,
        }
    }

    shared.closed.store(true, Ordering::SeqCst);

    // Commands still queued behind a failed write never reach the socket;
    // drop them, zero the accounting, and release any parked writers.
    rx.close();
    while let Ok(command) = rx.try_recv() {
        if let WriteCommand::Data(data) = command {
            shared.pending.fetch_sub(data.len(), Ordering::SeqCst);
        }
    }
    shared.writable.send_replace(true);

    if let Err(error) = writer.shutdown().await {
        tracing::debug!(id = %shared.id, %error, "channel shutdown failed");
    }
    registry.remove(shared.id);
    tracing::debug!(id = %shared.id, "channel closed");
}
