//! Object recycling for actions and RVPs
//!
//! Actions and RVPs are borrowed on every transaction, so they come from
//! pools instead of the allocator:
//! - Objects are reset (not reallocated) when given back
//! - Vec/HashMap capacity inside an object survives reuse
//! - The pool retains at most `capacity` idle objects
//!
//! A borrowed object is wrapped in [`Pooled`], which owns it exclusively and
//! returns it to its home cache when dropped. Ownership makes "two live
//! handles to one slot" unrepresentable.

use doradb_core::{Error, Result};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Objects that can be reset and reused
pub trait Recyclable: Default + Send + 'static {
    /// Clear per-use state before the object goes back to its pool
    fn reset(&mut self);
}

/// Counters of one cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Objects created by the allocator
    pub allocated: u64,
    /// Successful borrows
    pub borrowed: u64,
    /// Objects handed back
    pub returned: u64,
    /// Objects currently borrowed
    pub live: u64,
    /// Idle objects waiting in the pool
    pub idle: usize,
}

struct CacheInner<T> {
    name: &'static str,
    free: Mutex<Vec<Box<T>>>,
    capacity: usize,
    limit: Option<u64>,
    allocated: AtomicU64,
    borrowed: AtomicU64,
    returned: AtomicU64,
}

impl<T: Recyclable> CacheInner<T> {
    fn giveback(&self, mut value: Box<T>) {
        value.reset();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(value);
        }
        drop(free);
        self.returned.fetch_add(1, Ordering::AcqRel);
    }
}

/// Globally locked recycling pool
///
/// Cheap to clone; clones share the same pool. Borrowing and giving back may
/// happen on different threads (a coordinator borrows, a partition worker
/// gives back).
pub struct ObjectCache<T: Recyclable> {
    inner: Arc<CacheInner<T>>,
}

impl<T: Recyclable> Clone for ObjectCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Recyclable> ObjectCache<T> {
    /// Create a cache pre-filled with `capacity` objects and no borrow limit
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self::build(name, capacity, None)
    }

    /// Create a cache that refuses to have more than `limit` objects out
    pub fn bounded(name: &'static str, capacity: usize, limit: usize) -> Self {
        Self::build(name, capacity, Some(limit as u64))
    }

    fn build(name: &'static str, capacity: usize, limit: Option<u64>) -> Self {
        let free: Vec<Box<T>> = (0..capacity).map(|_| Box::default()).collect();
        Self {
            inner: Arc::new(CacheInner {
                name,
                free: Mutex::new(free),
                capacity,
                limit,
                allocated: AtomicU64::new(capacity as u64),
                borrowed: AtomicU64::new(0),
                returned: AtomicU64::new(0),
            }),
        }
    }

    /// Cache name (used in errors and logs)
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Borrow an object, allocating if the pool is empty
    ///
    /// Fails only for bounded caches whose limit is reached.
    pub fn borrow(&self) -> Result<Pooled<T>> {
        // check and reserve under the pool lock
        let mut free = self.inner.free.lock();
        if let Some(limit) = self.inner.limit {
            if self.live() >= limit {
                return Err(Error::CacheExhausted {
                    cache: self.inner.name,
                });
            }
        }
        self.inner.borrowed.fetch_add(1, Ordering::AcqRel);
        let recycled = free.pop();
        drop(free);

        let value = match recycled {
            Some(value) => value,
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                Box::default()
            }
        };
        Ok(Pooled {
            value: Some(value),
            home: Arc::clone(&self.inner),
        })
    }

    /// Objects currently borrowed
    pub fn live(&self) -> u64 {
        let borrowed = self.inner.borrowed.load(Ordering::Acquire);
        let returned = self.inner.returned.load(Ordering::Acquire);
        borrowed.saturating_sub(returned)
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStats {
        let borrowed = self.inner.borrowed.load(Ordering::Acquire);
        let returned = self.inner.returned.load(Ordering::Acquire);
        CacheStats {
            allocated: self.inner.allocated.load(Ordering::Relaxed),
            borrowed,
            returned,
            live: borrowed.saturating_sub(returned),
            idle: self.inner.free.lock().len(),
        }
    }
}

impl<T: Recyclable> std::fmt::Debug for ObjectCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Exclusively owned object borrowed from an [`ObjectCache`]
///
/// Dropping it (or calling [`Pooled::giveback`]) resets the object and
/// returns it to the cache it came from.
pub struct Pooled<T: Recyclable> {
    value: Option<Box<T>>,
    home: Arc<CacheInner<T>>,
}

impl<T: Recyclable> Pooled<T> {
    /// Return the object to its cache
    pub fn giveback(self) {
        drop(self)
    }

    /// Address of the pooled slot, stable across recycling
    pub fn slot_addr(&self) -> usize {
        match &self.value {
            Some(value) => &**value as *const T as usize,
            None => 0,
        }
    }
}

impl<T: Recyclable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("pooled object accessed after giveback"),
        }
    }
}

impl<T: Recyclable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("pooled object accessed after giveback"),
        }
    }
}

impl<T: Recyclable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.home.giveback(value);
        }
    }
}

impl<T: Recyclable + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&**self).finish()
    }
}
