//! Self-calibrating object pools.
//!
//! Every returned object is sampled into a power-of-two size-class
//! histogram. Once enough samples have accumulated, the pool recomputes the
//! size it hands out for fresh objects (`default_size`) and the largest
//! footprint it is willing to keep (`max_size`), so that a rare huge buffer
//! does not pin memory for the lifetime of the process.
//!
//! ```rust,ignore
//! use blaze_pool::adaptive::BufferPool;
//!
//! let pool = BufferPool::new(1024);
//! let mut buf = pool.get();
//! buf.extend_from_slice(b"hello");
//! pool.put(buf);
//! ```

mod buffer;
pub mod calibrate;
mod timer;

use std::fmt;

use crossbeam_queue::ArrayQueue;

pub use buffer::BufferPool;
pub use calibrate::SizeHistogram;
pub use timer::{Elapsed, Timer, TimerPool};

/// An object that can be recycled through an [`AdaptivePool`].
pub trait Recyclable: Send + 'static {
    /// Build a fresh object sized for roughly `size` bytes.
    fn with_size_hint(size: usize) -> Self;

    /// Size sampled into the demand histogram on `put`.
    fn pool_size(&self) -> usize;

    /// Memory the object pins while pooled. Objects above the calibrated
    /// `max_size` are dropped instead of recycled.
    fn footprint(&self) -> usize {
        self.pool_size()
    }

    /// Clear contents before the object is queued again.
    fn reset(&mut self);
}

/// Minimal pool interface shared by the adaptive pools.
pub trait ObjectPool<T> {
    fn get(&self) -> T;
    fn put(&self, value: T);
    /// Objects currently available for reuse.
    fn count(&self) -> i64;
}

type Constructor<T> = Box<dyn Fn(usize) -> T + Send + Sync>;

pub struct AdaptivePool<T> {
    free: ArrayQueue<T>,
    make: Constructor<T>,
    histogram: SizeHistogram,
}

impl<T: Recyclable> AdaptivePool<T> {
    /// Pool retaining at most `retain` idle objects.
    pub fn new(retain: usize) -> Self {
        Self::build(retain, Box::new(T::with_size_hint))
    }

    /// Pool whose fresh objects come from `make`; the size hint is ignored.
    pub fn with_constructor<F>(retain: usize, make: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(retain, Box::new(move |_| make()))
    }

    fn build(retain: usize, make: Constructor<T>) -> Self {
        Self {
            free: ArrayQueue::new(retain.max(1)),
            make,
            histogram: SizeHistogram::new(),
        }
    }

    /// A recycled object, or a fresh one sized to `default_size`.
    pub fn get(&self) -> T {
        self.try_get()
            .unwrap_or_else(|| (self.make)(self.histogram.default_size()))
    }

    /// A recycled object, if any is queued.
    pub fn try_get(&self) -> Option<T> {
        self.free.pop()
    }

    /// Return an object. Oversized objects and overflow are dropped.
    pub fn put(&self, value: T) {
        let size = value.pool_size();
        self.put_with_size(value, size);
    }

    /// Like [`put`](Self::put), but samples `size` as the demand instead of
    /// the object's current size. For callers that clear an object between
    /// uses and know the peak they needed.
    pub fn put_with_size(&self, mut value: T, size: usize) {
        self.histogram.record(size);

        if value.footprint() > self.histogram.max_size() {
            return;
        }
        value.reset();
        // Full queue: let it drop.
        let _ = self.free.push(value);
    }

    pub fn count(&self) -> i64 {
        self.free.len() as i64
    }

    /// Size of freshly constructed objects.
    pub fn default_size(&self) -> usize {
        self.histogram.default_size()
    }

    /// Largest footprint kept on `put`.
    pub fn max_size(&self) -> usize {
        self.histogram.max_size()
    }

    /// Number of queued objects this pool can hold.
    pub fn retain(&self) -> usize {
        self.free.capacity()
    }

    pub fn histogram(&self) -> &SizeHistogram {
        &self.histogram
    }
}

impl<T: Recyclable> ObjectPool<T> for AdaptivePool<T> {
    fn get(&self) -> T {
        AdaptivePool::get(self)
    }

    fn put(&self, value: T) {
        AdaptivePool::put(self, value)
    }

    fn count(&self) -> i64 {
        AdaptivePool::count(self)
    }
}

impl<T> fmt::Debug for AdaptivePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (default_size, max_size) = self.histogram.sizes();
        f.debug_struct("AdaptivePool")
            .field("idle", &self.free.len())
            .field("retain", &self.free.capacity())
            .field("default_size", &default_size)
            .field("max_size", &max_size)
            .finish()
    }
}
