//! Core building blocks shared across subsystems.
//!
//! # Data Flow
//! ```text
//! protocol registry / listener registry ──▶ ordered.rs (priority contract)
//! websocket message routing ─────────────▶ pool.rs (recyclable tasks)
//! ```

pub mod ordered;
pub mod pool;
pub mod registry;

pub use ordered::{Ordered, OrderedRegistry, RegistryFrozen};
pub use pool::{PooledTask, Recyclable, TaskPool};
pub use registry::SharedRegistry;
