//! Network plumbing subsystem.
//!
//! # Data Flow
//! ```text
//! listener.rs (bind + bounded accept)
//!     → connection.rs (identity, transport handle)
//!     → rewind.rs (replay of sniffed bytes)
//!     → channel.rs (tracked outbound channels, write backpressure)
//! ```

pub mod channel;
pub mod connection;
pub mod listener;
pub mod rewind;

pub use channel::{ChannelClosed, ChannelRegistry, TcpChannel};
pub use connection::{Connection, ConnectionId, Transport, TransportStream};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use rewind::Rewind;
