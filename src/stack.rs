//! Lock-free LIFO stack over a fixed arena of reusable slots.
//!
//! Nodes live in an arena that is allocated lazily in segments and never
//! freed while the stack exists, so a node reached through a stale index is
//! always valid memory. Two Treiber heads share the arena:
//!
//! ```text
//!   head ──▶ [7] ──▶ [2] ──▶ [5] ──▶ nil     LIFO stack (push / pop)
//!   vacant ─▶ [3] ──▶ [0] ──▶ nil            recycled slots (alloc / free)
//!   fresh = 8                                next never-used slot
//! ```
//!
//! Each head is a 64-bit word holding a 32-bit tag and `index + 1`
//! (zero means empty). Every successful CAS bumps the tag, so a head that
//! was popped and pushed back between a load and a CAS no longer compares
//! equal (the ABA case for recycled indices).
//!
//! Slots are addressed through [`SlotId`], a move-only token. Whoever
//! holds the token owns the slot's linkage: `push` consumes it, `pop`
//! hands it back. A slot therefore cannot be linked into two lists at once.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Slots per arena segment.
const SEGMENT_LEN: usize = 1024;

/// `next` value of the last node in a chain.
const NIL: u32 = u32::MAX;

/// Largest capacity a stack can address (indices are stored as `u32`).
pub const MAX_CAPACITY: usize = (u32::MAX - 1) as usize;

/// Ownership token for one arena slot.
///
/// Deliberately neither `Copy` nor `Clone`.
pub struct SlotId(u32);

impl SlotId {
    /// Position of the slot in the arena.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId({})", self.0)
    }
}

struct Node<T> {
    next: AtomicU32,
    value: T,
}

impl<T: Default> Default for Node<T> {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(NIL),
            value: T::default(),
        }
    }
}

#[inline]
fn pack(tag: u32, top: Option<u32>) -> u64 {
    ((tag as u64) << 32) | top.map_or(0, |index| index as u64 + 1)
}

#[inline]
fn unpack(word: u64) -> (u32, Option<u32>) {
    let tag = (word >> 32) as u32;
    let low = word as u32;
    (tag, low.checked_sub(1))
}

/// A tagged Treiber head, padded to its own cache line.
#[repr(align(64))]
struct Head {
    word: AtomicU64,
}

impl Head {
    const fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }
}

/// Lock-free LIFO stack of arena slots.
pub struct LockFreeStack<T> {
    head: Head,
    vacant: Head,
    len: AtomicUsize,
    fresh: AtomicUsize,
    capacity: usize,
    segments: Box<[OnceLock<Box<[Node<T>]>>]>,
}

impl<T: Default> LockFreeStack<T> {
    /// Create a stack able to address `capacity` slots.
    ///
    /// No slot memory is allocated until a slot is first handed out.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_CAPACITY);
        let segment_count = capacity.div_ceil(SEGMENT_LEN);
        let segments = (0..segment_count)
            .map(|_| OnceLock::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            head: Head::new(),
            vacant: Head::new(),
            len: AtomicUsize::new(0),
            fresh: AtomicUsize::new(0),
            capacity,
            segments,
        }
    }

    /// Maximum number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently linked into the stack (best-effort).
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        unpack(self.head.word.load(Ordering::Acquire)).1.is_none()
    }

    /// Take ownership of an unused slot.
    ///
    /// Recycled slots are preferred; after that, never-used slots are handed
    /// out in index order. Returns `None` once every slot is owned.
    pub fn alloc(&self) -> Option<SlotId> {
        if let Some(index) = self.pop_from(&self.vacant) {
            return Some(SlotId(index));
        }

        let index = self
            .fresh
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .ok()?;
        // Touch the segment so later lookups never race its initialization.
        let _ = self.node(index as u32);
        Some(SlotId(index as u32))
    }

    /// Return a slot to the vacant list. Its value is left as is.
    pub fn free(&self, id: SlotId) {
        self.push_to(&self.vacant, id.0);
    }

    /// Make `id` the new head.
    pub fn push(&self, id: SlotId) {
        // Count before publishing, so a racing pop never takes `len` below zero.
        self.len.fetch_add(1, Ordering::AcqRel);
        self.push_to(&self.head, id.0);
    }

    /// Remove and return the head, or `None` if the stack is empty.
    pub fn pop(&self) -> Option<SlotId> {
        let index = self.pop_from(&self.head)?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(SlotId(index))
    }

    /// Detach the whole chain with a single CAS.
    ///
    /// The returned tokens are in pop order (most recently pushed first).
    /// The caller owns every returned slot exclusively.
    pub fn take_all(&self) -> Vec<SlotId> {
        let mut current = self.head.word.load(Ordering::Acquire);
        let first = loop {
            let (tag, top) = unpack(current);
            let Some(top) = top else {
                return Vec::new();
            };
            match self.head.word.compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), None),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break top,
                Err(actual) => current = actual,
            }
        };

        let mut taken = Vec::new();
        let mut cursor = first;
        loop {
            let next = self.node(cursor).next.load(Ordering::Acquire);
            taken.push(SlotId(cursor));
            if next == NIL {
                break;
            }
            cursor = next;
        }
        self.len.fetch_sub(taken.len(), Ordering::AcqRel);
        taken
    }

    /// Borrow the value of an owned slot.
    #[inline]
    pub fn get(&self, id: &SlotId) -> &T {
        &self.node(id.0).value
    }

    /// Borrow the value at `index` whether or not it is currently owned.
    ///
    /// Returns `None` for indices that were never handed out.
    pub fn get_index(&self, index: usize) -> Option<&T> {
        if index >= self.fresh.load(Ordering::Acquire) {
            return None;
        }
        Some(&self.node(index as u32).value)
    }

    fn node(&self, index: u32) -> &Node<T> {
        let index = index as usize;
        let segment = self.segments[index / SEGMENT_LEN].get_or_init(|| {
            (0..SEGMENT_LEN)
                .map(|_| Node::default())
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });
        &segment[index % SEGMENT_LEN]
    }

    fn push_to(&self, head: &Head, index: u32) {
        let node = self.node(index);
        let mut current = head.word.load(Ordering::Acquire);
        loop {
            let (tag, top) = unpack(current);
            node.next.store(top.unwrap_or(NIL), Ordering::Relaxed);
            match head.word.compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), Some(index)),
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn pop_from(&self, head: &Head) -> Option<u32> {
        let mut current = head.word.load(Ordering::Acquire);
        loop {
            let (tag, top) = unpack(current);
            let top = top?;
            // May be stale if `top` was popped meanwhile; the tag makes the CAS fail then.
            let next = self.node(top).next.load(Ordering::Acquire);
            let next = (next != NIL).then_some(next);
            match head.word.compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(top),
                Err(actual) => current = actual,
            }
        }
    }
}

impl<T> fmt::Debug for LockFreeStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeStack")
            .field("len", &self.len.load(Ordering::Relaxed))
            .field("capacity", &self.capacity)
            .field("allocated", &self.fresh.load(Ordering::Relaxed))
            .finish()
    }
}
