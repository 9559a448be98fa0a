//! Worker slots and the idle stack shared by [`WorkerPool`] and [`TaskPool`].
//!
//! Ownership of a slot moves only through the stack CAS or the handoff:
//!
//! ```text
//!            pop (dispatcher)               resume(Serve)
//!   idle ────────────────────▶ dispatcher ──────────────▶ worker
//!     ▲                                                     │
//!     └──────────────────── push (park) ────────────────────┘
//! ```
//!
//! [`WorkerPool`]: super::WorkerPool
//! [`TaskPool`]: super::TaskPool

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::lane::Lane;
use crate::handoff::Handoff;
use crate::stack::{LockFreeStack, SlotId};

/// What a parked worker receives.
pub(crate) enum Dispatch<P> {
    /// Process the payload, then park again.
    Serve(SlotId, P),
    /// Terminate and give the slot back.
    Exit(SlotId),
}

/// Outcome of [`SlotTable::acquire`].
pub(crate) enum Acquired {
    /// A parked worker, ready for dispatch.
    Idle(SlotId),
    /// A reserved slot with no worker yet; the caller spawns one.
    Fresh(SlotId),
}

/// Called with `(live, idle)` whenever either count changes.
type Observer = Box<dyn Fn(usize, usize) + Send + Sync>;

/// One pooled worker.
pub(crate) struct WorkerSlot<P> {
    /// Nanoseconds since the table epoch when the worker last went idle.
    last_idle: AtomicU64,
    inbox: Handoff<Dispatch<P>>,
}

impl<P> Default for WorkerSlot<P> {
    fn default() -> Self {
        Self {
            last_idle: AtomicU64::new(0),
            inbox: Handoff::new(),
        }
    }
}

pub(crate) struct SlotTable<P> {
    slots: LockFreeStack<WorkerSlot<P>>,
    live: AtomicUsize,
    max_workers: usize,
    must_stop: AtomicBool,
    lane: Lane,
    epoch: Instant,
    /// Odd while a reap pass holds the idle chain.
    reap_gen: AtomicU64,
    observer: Option<Observer>,
}

impl<P: Send> SlotTable<P> {
    pub(crate) fn new(max_workers: usize, lane: Lane) -> Self {
        let slots = LockFreeStack::with_capacity(max_workers);
        Self {
            max_workers: slots.capacity(),
            slots,
            live: AtomicUsize::new(0),
            must_stop: AtomicBool::new(false),
            lane,
            epoch: Instant::now(),
            reap_gen: AtomicU64::new(0),
            observer: None,
        }
    }

    pub(crate) fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    #[inline]
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn idle(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn max_workers(&self) -> usize {
        self.max_workers
    }

    #[inline]
    pub(crate) fn lane(&self) -> Lane {
        self.lane
    }

    #[inline]
    pub(crate) fn is_stopping(&self) -> bool {
        self.must_stop.load(Ordering::Acquire)
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&WorkerSlot<P>> {
        self.slots.get_index(index)
    }

    /// Most recently parked worker, if any.
    #[inline]
    pub(crate) fn acquire_idle(&self) -> Option<SlotId> {
        let id = self.slots.pop();
        if id.is_some() {
            self.observe();
        }
        id
    }

    /// An idle worker, else a fresh reservation, else `None` at capacity.
    ///
    /// A reap pass briefly detaches the whole idle chain; running into one
    /// yields and retries instead of reporting the pool as full.
    pub(crate) async fn acquire(&self) -> Option<Acquired> {
        loop {
            let reap_gen = self.reap_gen.load(Ordering::SeqCst);
            if let Some(id) = self.acquire_idle() {
                return Some(Acquired::Idle(id));
            }
            if let Some(id) = self.try_reserve() {
                return Some(Acquired::Fresh(id));
            }
            if reap_gen & 1 == 0 && self.reap_gen.load(Ordering::SeqCst) == reap_gen {
                return None;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Count a new worker and give it a slot, unless at the ceiling.
    pub(crate) fn try_reserve(&self) -> Option<SlotId> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_workers).then_some(n + 1)
            })
            .ok()?;

        // Retiring workers free their slot before they uncount themselves,
        // so a successful reservation always finds one.
        match self.slots.alloc() {
            Some(id) => {
                self.observe();
                Some(id)
            }
            None => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                None
            }
        }
    }

    /// Hand `payload` to the worker parked on `id`.
    pub(crate) async fn dispatch(&self, id: SlotId, payload: P) {
        let slot = self.slots.get(&id);
        match self.lane {
            Lane::Multi => slot.inbox.resume(Dispatch::Serve(id, payload)),
            Lane::Single => slot.inbox.resume_and_wait(Dispatch::Serve(id, payload)).await,
        }
    }

    /// Return a finished worker to the idle stack.
    ///
    /// Hands the token back when the pool is stopping; the worker must then
    /// retire instead of parking.
    pub(crate) fn park(&self, id: SlotId) -> Result<(), SlotId> {
        if self.is_stopping() {
            return Err(id);
        }
        self.slots
            .get(&id)
            .last_idle
            .store(self.now_nanos(), Ordering::Release);
        self.slots.push(id);
        self.observe();

        // `stop` may have drained the stack between the check and the push.
        if self.is_stopping() {
            self.drain_idle();
        }
        Ok(())
    }

    /// Give the slot back and uncount the worker. Last act of a worker.
    pub(crate) fn retire(&self, id: SlotId) {
        self.slots.free(id);
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.observe();
    }

    /// Set the stop flag and wake every idle worker with an exit.
    pub(crate) fn stop(&self) -> usize {
        self.must_stop.store(true, Ordering::Release);
        self.drain_idle()
    }

    pub(crate) fn drain_idle(&self) -> usize {
        let mut drained = 0;
        while let Some(id) = self.slots.pop() {
            self.exit(id);
            drained += 1;
        }
        if drained > 0 {
            self.observe();
        }
        drained
    }

    /// Evict workers idle for longer than `max_idle`. Returns how many.
    pub(crate) fn reap(&self, max_idle: Duration) -> usize {
        let cutoff = self.now_nanos().saturating_sub(max_idle.as_nanos() as u64);
        let mut keep = Vec::new();
        let mut evicted = 0;

        self.reap_gen.fetch_add(1, Ordering::SeqCst);
        for id in self.slots.take_all() {
            let last_idle = self.slots.get(&id).last_idle.load(Ordering::Acquire);
            if last_idle < cutoff {
                self.exit(id);
                evicted += 1;
            } else {
                keep.push(id);
            }
        }

        // Oldest first, so the most recently idled worker ends on top again.
        for id in keep.into_iter().rev() {
            self.slots.push(id);
        }
        self.reap_gen.fetch_add(1, Ordering::SeqCst);
        self.observe();
        if self.is_stopping() {
            self.drain_idle();
        }
        evicted
    }

    fn exit(&self, id: SlotId) {
        let slot = self.slots.get(&id);
        slot.inbox.resume(Dispatch::Exit(id));
    }

    fn observe(&self) {
        if let Some(observer) = &self.observer {
            observer(self.live(), self.idle());
        }
    }

    fn now_nanos(&self) -> u64 {
        // Never zero, so a fresh slot always reads as older than a parked one.
        self.epoch.elapsed().as_nanos() as u64 + 1
    }
}

/// Hands the slot back if a worker is torn down mid-job, by a panic outside
/// the handler or by its task being dropped.
struct RetireOnDrop<'a, P: Send> {
    table: &'a SlotTable<P>,
    id: Option<SlotId>,
}

impl<P: Send> Drop for RetireOnDrop<'_, P> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            tracing::warn!(worker = id.index(), "worker torn down mid-job, slot released");
            self.table.retire(id);
        }
    }
}

/// Worker task body: wait for dispatches until told to exit.
pub(crate) async fn run_worker<P, F, Fut>(table: &SlotTable<P>, index: usize, mut process: F)
where
    P: Send,
    F: FnMut(P) -> Fut,
    Fut: Future<Output = ()>,
{
    let Some(slot) = table.slot(index) else {
        return;
    };

    loop {
        match slot.inbox.suspend().await {
            Dispatch::Serve(id, payload) => {
                let mut guard = RetireOnDrop {
                    table,
                    id: Some(id),
                };
                process(payload).await;
                let Some(id) = guard.id.take() else {
                    break;
                };
                if let Err(id) = table.park(id) {
                    table.retire(id);
                    break;
                }
            }
            Dispatch::Exit(id) => {
                table.retire(id);
                break;
            }
        }
    }
}
