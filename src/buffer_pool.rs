//! Reference-counted object pool used to hand the same buffer to many readers.
//!
//! A caller acquires a [`Lease`] with exclusive write access, fills it, and converts it into a
//! [`Shared`] handle with [`Lease::freeze`]. The shared handle wraps the pooled value in an `Arc`,
//! so registering another owner is a `clone` and releasing one is a `drop`. Whichever drop
//! observes the last owner going away pushes the value back onto the pool's free list and bumps
//! the `returned` counter. Dropping a lease that was never frozen returns it the same way.
//!
//! Values never leave the pool once constructed: the free list grows to the peak number of
//! concurrently outstanding buffers and then recirculates. Handles only keep a `Weak` reference to
//! the pool, so a pool that has been dropped simply lets late releases deallocate.

use crossbeam_queue::SegQueue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Reset hook run on a value right before it re-enters the free list.
pub trait Recycle {
    fn recycle(&mut self);
}

impl Recycle for Vec<u8> {
    fn recycle(&mut self) {
        self.clear();
    }
}

struct PoolShared<T> {
    idle: SegQueue<Box<T>>,
    allocated: AtomicU64,
    acquired: AtomicU64,
    returned: AtomicU64,
}

impl<T> PoolShared<T> {
    fn reclaim(&self, value: Box<T>) {
        self.returned.fetch_add(1, Ordering::AcqRel);
        self.idle.push(value);
    }
}

/// Return `value` to the pool behind `pool`, or free it if the pool is gone.
fn release<T: Recycle>(pool: &Weak<PoolShared<T>>, mut value: Box<T>) {
    value.recycle();
    if let Some(pool) = pool.upgrade() {
        pool.reclaim(value);
    }
}

/// Diagnostic snapshot of the pool's lifetime counters.
///
/// All three counters only grow. `acquired - returned` is the number of values currently held
/// by at least one owner; once the pool is quiescent `allocated == idle + in_flight()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Values ever constructed by the pool.
    pub allocated: u64,
    /// Leases handed out by `acquire`.
    pub acquired: u64,
    /// Reclamation events (last owner released a value).
    pub returned: u64,
    /// Values currently sitting in the free list.
    pub idle: usize,
}

impl PoolStats {
    /// Values currently held by at least one owner.
    pub fn in_flight(&self) -> u64 {
        self.acquired.saturating_sub(self.returned)
    }
}

/// Thread-safe free list of `T` values with reference-counted hand-out.
pub struct RefCountedPool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for RefCountedPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Recycle + Default> RefCountedPool<T> {
    /// Create an empty pool. Values are constructed lazily by [`acquire`](Self::acquire).
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared {
                idle: SegQueue::new(),
                allocated: AtomicU64::new(0),
                acquired: AtomicU64::new(0),
                returned: AtomicU64::new(0),
            }),
        }
    }

    /// Create a pool with `count` values already constructed and idle.
    pub fn with_capacity(count: usize) -> Self {
        let pool = Self::new();
        for _ in 0..count {
            pool.shared.idle.push(Box::default());
            pool.shared.allocated.fetch_add(1, Ordering::AcqRel);
        }
        pool
    }

    /// Take an idle value (or construct one) with exactly one owner: the returned lease.
    pub fn acquire(&self) -> Lease<T> {
        let value = self.shared.idle.pop().unwrap_or_else(|| {
            self.shared.allocated.fetch_add(1, Ordering::AcqRel);
            Box::default()
        });
        self.shared.acquired.fetch_add(1, Ordering::AcqRel);
        Lease {
            value: Some(value),
            pool: Arc::downgrade(&self.shared),
        }
    }
}

impl<T: Recycle + Default> Default for RefCountedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RefCountedPool<T> {
    pub fn allocated(&self) -> u64 {
        self.shared.allocated.load(Ordering::Acquire)
    }

    pub fn acquired(&self) -> u64 {
        self.shared.acquired.load(Ordering::Acquire)
    }

    pub fn returned(&self) -> u64 {
        self.shared.returned.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        // Every release happens after its acquire, so loading `returned` first keeps the
        // snapshot at returned <= acquired even while other threads are active.
        let returned = self.returned();
        let acquired = self.acquired();
        let idle = self.shared.idle.len();
        let allocated = self.allocated();
        PoolStats {
            allocated,
            acquired,
            returned,
            idle,
        }
    }
}

impl<T> fmt::Debug for RefCountedPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCountedPool")
            .field("allocated", &self.allocated())
            .field("acquired", &self.acquired())
            .field("returned", &self.returned())
            .field("idle", &self.shared.idle.len())
            .finish()
    }
}

/// Exclusive, writable ownership of a pooled value prior to sharing it.
pub struct Lease<T: Recycle> {
    value: Option<Box<T>>,
    pool: Weak<PoolShared<T>>,
}

impl<T: Recycle> Lease<T> {
    /// Convert the lease into a shared handle. The owner count stays at one.
    pub fn freeze(mut self) -> Shared<T> {
        let value = self.value.take();
        Shared {
            slot: Arc::new(Slot {
                value,
                pool: self.pool.clone(),
            }),
        }
    }
}

impl<T: Recycle> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_deref().expect("lease holds a value until frozen")
    }
}

impl<T: Recycle> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
            .as_deref_mut()
            .expect("lease holds a value until frozen")
    }
}

impl<T: Recycle> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            release(&self.pool, value);
        }
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lease").field(&self.value).finish()
    }
}

struct Slot<T: Recycle> {
    value: Option<Box<T>>,
    pool: Weak<PoolShared<T>>,
}

impl<T: Recycle> Drop for Slot<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            release(&self.pool, value);
        }
    }
}

/// Read-only handle to a pooled value shared between any number of owners.
///
/// `clone` registers one more owner; dropping the last clone returns the value to the pool.
pub struct Shared<T: Recycle> {
    slot: Arc<Slot<T>>,
}

impl<T: Recycle> Shared<T> {
    /// Current number of owners.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.slot)
    }

    /// Whether both handles refer to the same pooled value.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.slot, &other.slot)
    }
}

impl<T: Recycle> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Recycle> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.slot
            .value
            .as_deref()
            .expect("shared slot holds a value until dropped")
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("refs", &self.ref_count())
            .field("value", &self.slot.value)
            .finish()
    }
}
