//! Multi-Protocol Single-Port Server Core
//!
//! Serves several wire protocols (WebSocket, plain HTTP, raw TCP framings)
//! on one listening port by sniffing each connection's opening bytes and
//! handing the connection to the first protocol handler that recognizes
//! them.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────┐
//!                       │                   SERVER                     │
//!                       │                                              │
//!   Client Connection   │  ┌─────────┐    ┌────────────┐               │
//!   ────────────────────┼─▶│   net   │───▶│  protocol  │               │
//!                       │  │listener │    │ dispatcher │ (byte sniff)  │
//!                       │  └─────────┘    └─────┬──────┘               │
//!                       │                       │ first definite match │
//!                       │        ┌──────────────┼──────────────┐       │
//!                       │        ▼              ▼              ▼       │
//!                       │  ┌───────────┐  ┌──────────┐  ┌───────────┐  │
//!                       │  │ websocket │  │   http   │  │  raw tcp  │  │
//!                       │  │ sessions  │  │ handler  │  │ channels  │  │
//!                       │  └───────────┘  └──────────┘  └───────────┘  │
//!                       │                                              │
//!                       │  ┌────────────────────────────────────────┐  │
//!                       │  │          Cross-Cutting Concerns        │  │
//!                       │  │  config · lifecycle · observability    │  │
//!                       │  │  ordered registries · task pool        │  │
//!                       │  └────────────────────────────────────────┘  │
//!                       └──────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod core;
pub mod net;
pub mod protocol;
pub mod server;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use lifecycle::Shutdown;
pub use protocol::{ProtocolHandler, SniffOutcome};
pub use server::{Server, ServerListener};
