//! Reusable timers.
//!
//! Arming a pooled `Sleep` avoids allocating a timer entry per handled
//! connection when a handler deadline is configured.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{Instant, Sleep};

use super::{AdaptivePool, Recyclable};

/// Idle timers kept by [`TimerPool::default`].
const DEFAULT_RETAIN: usize = 1024;

/// A pinned sleep that can be re-armed.
pub struct Timer {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl Timer {
    fn new(deadline: Instant) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep_until(deadline)),
            armed: true,
        }
    }

    /// Whether the timer is armed and has not fired.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn deadline(&self) -> Instant {
        self.sleep.deadline()
    }

    /// Disarm without firing.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }

    fn rearm(&mut self, deadline: Instant) {
        if self.armed {
            panic!("BUG: active timer trapped into acquire");
        }
        self.sleep.as_mut().reset(deadline);
        self.armed = true;
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.sleep.as_mut().poll(cx) {
            Poll::Ready(()) => {
                self.armed = false;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Recyclable for Timer {
    fn with_size_hint(_: usize) -> Self {
        let mut timer = Timer::new(Instant::now());
        timer.armed = false;
        timer
    }

    fn pool_size(&self) -> usize {
        std::mem::size_of::<Sleep>()
    }

    fn reset(&mut self) {}
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("armed", &self.armed)
            .field("deadline", &self.sleep.deadline())
            .finish()
    }
}

/// The wrapped future did not complete in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline of {}ms elapsed", self.0.as_millis())
    }
}

impl std::error::Error for Elapsed {}

pub struct TimerPool {
    pool: AdaptivePool<Timer>,
}

impl TimerPool {
    pub fn new(retain: usize) -> Self {
        Self {
            pool: AdaptivePool::new(retain),
        }
    }

    /// A timer firing after `timeout`.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// If a recycled timer is still armed.
    pub fn acquire(&self, timeout: Duration) -> Timer {
        let deadline = Instant::now() + timeout;
        match self.pool.try_get() {
            Some(mut timer) => {
                timer.rearm(deadline);
                timer
            }
            None => Timer::new(deadline),
        }
    }

    /// Stop `timer` and return it to the pool.
    pub fn release(&self, mut timer: Timer) {
        timer.stop();
        self.pool.put(timer);
    }

    /// Run `fut` with a pooled deadline.
    pub async fn timeout<F: Future>(&self, timeout: Duration, fut: F) -> Result<F::Output, Elapsed> {
        let mut timer = self.acquire(timeout);
        let result = tokio::select! {
            biased;
            out = fut => Ok(out),
            _ = &mut timer => Err(Elapsed(timeout)),
        };
        self.release(timer);
        result
    }

    /// Idle timers ready for reuse.
    pub fn idle(&self) -> i64 {
        self.pool.count()
    }
}

impl Default for TimerPool {
    fn default() -> Self {
        Self::new(DEFAULT_RETAIN)
    }
}

impl fmt::Debug for TimerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerPool")
            .field("idle", &self.pool.count())
            .finish()
    }
}
