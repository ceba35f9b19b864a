//! Process lifecycle coordination.
//!
//! # Responsibilities
//! - Broadcast a shutdown signal to every long-running task
//! - Translate OS signals into a server stop

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
