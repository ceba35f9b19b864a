//! Ordering contract for pluggable components.
//!
//! # Responsibilities
//! - Define the priority order shared by protocol handlers and server listeners
//! - Provide a registry that freezes into a deterministic iteration order
//!
//! # Design Decisions
//! - Lower `order()` values sort first (runs earlier)
//! - Equal priorities break ties by registration index (stable sort)
//! - The registry is mutable until `freeze()` and immutable after; the
//!   "read-only during dispatch" invariant is structural, not documented

use std::fmt;
use std::sync::Arc;

/// Components that participate in priority ordering.
pub trait Ordered {
    /// Priority of this component. Lower values run first.
    fn order(&self) -> i32 {
        0
    }
}

impl<T: Ordered + ?Sized> Ordered for Arc<T> {
    fn order(&self) -> i32 {
        (**self).order()
    }
}

/// Error returned when registering into a registry that has been frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryFrozen;

impl fmt::Display for RegistryFrozen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registry is frozen; registration is only allowed before start")
    }
}

impl std::error::Error for RegistryFrozen {}

/// An ordered collection of components, sorted once at freeze time.
///
/// Registration order is preserved as the tie-breaker between entries with
/// equal priority, so iteration is deterministic across runs for a given
/// registration sequence.
#[derive(Debug)]
pub struct OrderedRegistry<T> {
    entries: Vec<T>,
    frozen: bool,
}

impl<T: Ordered> OrderedRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            frozen: false,
        }
    }

    /// Register a component. Fails once the registry has been frozen.
    pub fn register(&mut self, entry: T) -> Result<(), RegistryFrozen> {
        if self.frozen {
            return Err(RegistryFrozen);
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Sort entries by priority and reject any further registration.
    ///
    /// `Vec::sort_by_key` is stable, so registration index decides ties.
    pub fn freeze(&mut self) {
        self.entries.sort_by_key(|e| e.order());
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries. Order is only meaningful after `freeze()`.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Consume the registry, returning the (sorted, if frozen) entries.
    pub fn into_entries(self) -> Vec<T> {
        self.entries
    }
}

impl<T: Ordered> Default for OrderedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
