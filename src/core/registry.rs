//! Freeze-at-start shared registry.
//!
//! # Responsibilities
//! - Collect components during configuration
//! - Publish an immutable, priority-sorted snapshot at server start
//!
//! # Design Decisions
//! - Staging lives behind a mutex; the frozen snapshot is published through
//!   arc-swap so dispatch-path reads are lock-free
//! - Before `freeze()` there is no snapshot; dispatch cannot observe a
//!   half-registered set

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;

use crate::core::ordered::{Ordered, OrderedRegistry, RegistryFrozen};

/// A registry shared between the configuration phase and the dispatch path.
pub struct SharedRegistry<T: Ordered + ?Sized> {
    staging: Mutex<OrderedRegistry<Arc<T>>>,
    active: ArcSwapOption<Vec<Arc<T>>>,
}

impl<T: Ordered + ?Sized> SharedRegistry<T> {
    pub fn new() -> Self {
        Self {
            staging: Mutex::new(OrderedRegistry::new()),
            active: ArcSwapOption::from(None),
        }
    }

    /// Register a component. Fails after `freeze()`.
    pub fn register(&self, entry: Arc<T>) -> Result<(), RegistryFrozen> {
        self.staging
            .lock()
            .expect("registry mutex poisoned")
            .register(entry)
    }

    /// Sort by priority and publish the immutable snapshot.
    pub fn freeze(&self) -> Arc<Vec<Arc<T>>> {
        let mut staging = self.staging.lock().expect("registry mutex poisoned");
        staging.freeze();
        let snapshot: Arc<Vec<Arc<T>>> =
            Arc::new(staging.iter().map(Arc::clone).collect());
        self.active.store(Some(Arc::clone(&snapshot)));
        snapshot
    }

    /// The frozen snapshot, if the registry has been frozen.
    pub fn snapshot(&self) -> Option<Arc<Vec<Arc<T>>>> {
        self.active.load_full()
    }

    pub fn is_frozen(&self) -> bool {
        self.active.load().is_some()
    }

    pub fn len(&self) -> usize {
        self.staging.lock().expect("registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Ordered + ?Sized> Default for SharedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
