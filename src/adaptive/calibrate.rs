//! Size-class demand histogram and calibration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// log2 of the smallest size class.
pub const MIN_BIT_SIZE: usize = 6;

/// Number of size classes.
pub const STEPS: usize = 20;

/// Smallest size class (64 bytes).
pub const MIN_SIZE: usize = 1 << MIN_BIT_SIZE;

/// Largest size class (1 MiB).
pub const MAX_SIZE: usize = 1 << 20;

/// Puts observed before a calibration runs.
pub const CALIBRATE_CALLS_THRESHOLD: u64 = 100_000;

/// Share of observed demand the default/max pair must cover.
pub const MAX_PERCENTILE: f64 = 0.95;

/// Size class of a request of `n` bytes.
pub fn index(n: usize) -> usize {
    let mut n = n.saturating_sub(1) >> MIN_BIT_SIZE;
    let mut idx = 0;
    while n > 0 {
        n >>= 1;
        idx += 1;
    }
    idx.min(STEPS - 1)
}

/// Size in bytes of class `idx`. Classes past 1 MiB all map to `MAX_SIZE`.
#[inline]
pub fn class_size(idx: usize) -> usize {
    (MIN_SIZE << idx.min(STEPS - 1)).min(MAX_SIZE)
}

/// Compute `(default_size, max_size)` from per-class demand.
///
/// Returns `None` when no demand was recorded.
pub fn calibrate(calls: &[u64; STEPS]) -> Option<(usize, usize)> {
    let observed: u64 = calls.iter().sum();
    if observed == 0 {
        return None;
    }

    let max_sum = (observed as f64 * MAX_PERCENTILE) as u64;
    let mut calls_sum = 0u64;
    let mut default_size = None;
    let mut max_size = MIN_SIZE;

    for (idx, &count) in calls.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let size = class_size(idx);
        calls_sum += count;
        default_size.get_or_insert(size);
        max_size = max_size.max(size);
        if calls_sum > max_sum {
            break;
        }
    }

    Some((default_size.unwrap_or(MIN_SIZE), max_size))
}

#[inline]
fn pack(default_size: usize, max_size: usize) -> u64 {
    ((default_size as u64) << 32) | max_size as u64
}

#[inline]
fn unpack(word: u64) -> (usize, usize) {
    ((word >> 32) as usize, (word & u32::MAX as u64) as usize)
}

/// Demand counters plus the published size pair.
pub struct SizeHistogram {
    calls: [AtomicU64; STEPS],
    total: AtomicU64,
    calibrating: AtomicBool,
    /// `default_size << 32 | max_size`, swapped as one word.
    sizes: AtomicU64,
    calibrations: AtomicU64,
}

impl SizeHistogram {
    pub fn new() -> Self {
        Self {
            calls: std::array::from_fn(|_| AtomicU64::new(0)),
            total: AtomicU64::new(0),
            calibrating: AtomicBool::new(false),
            sizes: AtomicU64::new(pack(MIN_SIZE, MAX_SIZE)),
            calibrations: AtomicU64::new(0),
        }
    }

    /// Count one request of `size` bytes. Calibrates when the threshold is
    /// crossed and no other caller is already doing so.
    pub fn record(&self, size: usize) {
        self.calls[index(size)].fetch_add(1, Ordering::Relaxed);
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        if total > CALIBRATE_CALLS_THRESHOLD {
            self.calibrate();
        }
    }

    /// Recompute the size pair from the counters and reset them.
    ///
    /// Returns `false` without touching anything if another caller is
    /// already calibrating.
    pub fn calibrate(&self) -> bool {
        if self
            .calibrating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        let calls: [u64; STEPS] =
            std::array::from_fn(|idx| self.calls[idx].swap(0, Ordering::Relaxed));
        self.total.store(0, Ordering::Relaxed);

        if let Some((default_size, max_size)) = calibrate(&calls) {
            self.sizes
                .store(pack(default_size, max_size), Ordering::Release);
            self.calibrations.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(default_size, max_size, "pool calibrated");
        }
        self.calibrating.store(false, Ordering::Release);
        true
    }

    #[inline]
    pub fn default_size(&self) -> usize {
        self.sizes().0
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.sizes().1
    }

    /// `(default_size, max_size)` as last published.
    #[inline]
    pub fn sizes(&self) -> (usize, usize) {
        unpack(self.sizes.load(Ordering::Acquire))
    }

    /// Number of completed calibrations.
    pub fn calibrations(&self) -> u64 {
        self.calibrations.load(Ordering::Relaxed)
    }
}

impl Default for SizeHistogram {
    fn default() -> Self {
        Self::new()
    }
}
