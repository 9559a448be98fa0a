//! Single-slot suspend/resume handoff between a dispatcher and one worker.
//!
//! A worker parks on [`Handoff::suspend`] and consumes no scheduler time
//! until a dispatcher calls [`Handoff::resume`] with a payload. This replaces
//! a bounded channel when exactly one producer and one consumer are matched
//! per delivery: no allocation, no lock, one atomic state word.
//!
//! ```text
//!   EMPTY ──resume──▶ WRITING ──▶ FULL ──suspend──▶ TAKING ──▶ EMPTY
//! ```
//!
//! [`Handoff::resume_and_wait`] is the zero-capacity variant: the returned
//! future completes only after the worker has taken the payload.
//!
//! Resuming a handoff that already holds a payload is a protocol bug and
//! panics. Callers guarantee exclusivity by owning the worker's slot token
//! at the time of the call.

use std::cell::UnsafeCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::task::{Context, Poll};

use futures_util::task::AtomicWaker;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const FULL: u8 = 2;
const TAKING: u8 = 3;

pub struct Handoff<T> {
    state: AtomicU8,
    value: UnsafeCell<Option<T>>,
    /// Waker of the suspended receiver.
    parked: AtomicWaker,
    /// Waker of a rendezvous sender waiting for pickup.
    sender: AtomicWaker,
    /// Number of payloads taken so far.
    taken: AtomicU64,
}

// SAFETY: `value` is only touched by the thread that moved `state` to
// WRITING (publisher) or TAKING (receiver); both transitions are exclusive CAS.
unsafe impl<T: Send> Sync for Handoff<T> {}

impl<T> Handoff<T> {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(None),
            parked: AtomicWaker::new(),
            sender: AtomicWaker::new(),
            taken: AtomicU64::new(0),
        }
    }

    /// Deliver `payload` and wake the suspended receiver.
    ///
    /// # Panics
    ///
    /// If a payload is already pending.
    pub fn resume(&self, payload: T) {
        self.publish(payload);
    }

    /// Deliver `payload` and wait until the receiver has taken it.
    pub fn resume_and_wait(&self, payload: T) -> Delivered<'_, T> {
        let seen = self.publish(payload);
        Delivered {
            handoff: self,
            seen,
        }
    }

    /// Park until a payload is delivered.
    pub fn suspend(&self) -> Suspend<'_, T> {
        Suspend { handoff: self }
    }

    /// Take a pending payload without parking.
    pub fn try_take(&self) -> Option<T> {
        self.state
            .compare_exchange(FULL, TAKING, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        // SAFETY: TAKING grants exclusive access to `value`.
        let value = unsafe { (*self.value.get()).take() };
        self.taken.fetch_add(1, Ordering::Release);
        self.state.store(EMPTY, Ordering::Release);
        self.sender.wake();
        value
    }

    /// Whether a payload is waiting to be taken.
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.state.load(Ordering::Acquire) == FULL
    }

    /// Total number of payloads taken from this handoff.
    #[inline]
    pub fn deliveries(&self) -> u64 {
        self.taken.load(Ordering::Acquire)
    }

    fn publish(&self, payload: T) -> u64 {
        if let Err(state) =
            self.state
                .compare_exchange(EMPTY, WRITING, Ordering::AcqRel, Ordering::Acquire)
        {
            panic!("BUG: resume on a handoff that is not suspended (state={state})");
        }
        let seen = self.taken.load(Ordering::Acquire);
        // SAFETY: WRITING grants exclusive access to `value`.
        unsafe { *self.value.get() = Some(payload) };
        self.state.store(FULL, Ordering::Release);
        self.parked.wake();
        seen
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Handoff<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("taken", &self.taken.load(Ordering::Relaxed))
            .finish()
    }
}

/// Future returned by [`Handoff::suspend`].
#[must_use = "futures do nothing unless polled"]
pub struct Suspend<'a, T> {
    handoff: &'a Handoff<T>,
}

impl<T> Future for Suspend<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let handoff = self.handoff;
        if let Some(value) = handoff.try_take() {
            return Poll::Ready(value);
        }
        handoff.parked.register(cx.waker());
        // Re-check: a publish may have landed between the take and the register.
        match handoff.try_take() {
            Some(value) => Poll::Ready(value),
            None => Poll::Pending,
        }
    }
}

/// Future returned by [`Handoff::resume_and_wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Delivered<'a, T> {
    handoff: &'a Handoff<T>,
    seen: u64,
}

impl<T> Future for Delivered<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.handoff.deliveries() > self.seen {
            return Poll::Ready(());
        }
        self.handoff.sender.register(cx.waker());
        if self.handoff.deliveries() > self.seen {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
