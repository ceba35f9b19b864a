//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters on the dispatch path)
//!
//! Consumers:
//!     → Log aggregation (stdout, file, remote)
//!     → Whatever metrics recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - Structured logging via tracing; filter from config or RUST_LOG
//! - Metrics go through the facade crate; no exporter is bundled

pub mod logging;
pub mod metrics;
