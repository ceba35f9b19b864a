//! Recyclable task pool.
//!
//! # Responsibilities
//! - Hand out reusable task instances without per-message allocation
//! - Reset every instance to neutral state before it can be reused
//!
//! # Design Decisions
//! - Mutex-protected free list; acquire pops, release pushes
//! - Release happens on guard drop, so a task is returned even when the
//!   dispatch it carried failed or unwound
//! - Acquire transfers exclusive ownership: the instance is only reachable
//!   through the guard, which makes use-after-recycle unrepresentable
//! - Retention is capped so a burst does not pin memory forever

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// A unit of work that can be reset to a neutral state and reused.
pub trait Recyclable: Send {
    /// Restore every field to its neutral value.
    fn reset(&mut self);
}

/// A thread-safe pool of recyclable task instances.
///
/// `acquire` allocates only when the free list is empty; dropping the
/// returned guard resets the instance and returns it to the pool.
pub struct TaskPool<T: Recyclable> {
    free: Arc<Mutex<Vec<T>>>,
    create: Arc<dyn Fn() -> T + Send + Sync>,
    max_idle: usize,
}

impl<T: Recyclable + 'static> TaskPool<T> {
    /// Create a pool that builds new instances with `create` and retains at
    /// most `max_idle` recycled instances.
    pub fn new<F>(max_idle: usize, create: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            free: Arc::new(Mutex::new(Vec::new())),
            create: Arc::new(create),
            max_idle,
        }
    }

    /// Take a task from the pool, allocating if the pool is empty.
    ///
    /// The instance is guaranteed to be in its neutral state.
    pub fn acquire(&self) -> PooledTask<T> {
        let task = {
            let mut free = self.free.lock().expect("task pool mutex poisoned");
            free.pop()
        };
        let task = task.unwrap_or_else(|| (self.create)());

        PooledTask {
            task: Some(task),
            free: Arc::clone(&self.free),
            max_idle: self.max_idle,
        }
    }

    /// Number of idle instances currently held by the pool.
    pub fn idle(&self) -> usize {
        self.free.lock().expect("task pool mutex poisoned").len()
    }
}

impl<T: Recyclable> Clone for TaskPool<T> {
    fn clone(&self) -> Self {
        Self {
            free: Arc::clone(&self.free),
            create: Arc::clone(&self.create),
            max_idle: self.max_idle,
        }
    }
}

/// Exclusive handle to a pooled task.
///
/// Dropping the guard resets the task and returns it to the pool.
pub struct PooledTask<T: Recyclable> {
    task: Option<T>,
    free: Arc<Mutex<Vec<T>>>,
    max_idle: usize,
}

impl<T: Recyclable> Deref for PooledTask<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.task.as_ref().expect("pooled task already recycled")
    }
}

impl<T: Recyclable> DerefMut for PooledTask<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.task.as_mut().expect("pooled task already recycled")
    }
}

impl<T: Recyclable> Drop for PooledTask<T> {
    fn drop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.reset();
            if let Ok(mut free) = self.free.lock() {
                if free.len() < self.max_idle {
                    free.push(task);
                }
            }
        }
    }
}
