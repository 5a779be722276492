//! Indexed min-heap timer for per-connection idle expiry.
//!
//! A plain binary heap augmented with `ref_`, a map from connection id to
//! heap position, so a specific id can be updated or deleted in O(log n)
//! instead of a linear scan. This mirrors the timer used by single-threaded
//! reactor-style HTTP servers rather than a hierarchical timing wheel: the
//! core only ever tracks on the order of "open connections" timers, so the
//! heap's worse asymptotic complexity at huge scale doesn't matter, and the
//! heap gives exact expiry ordering with none of a wheel's tick-granularity
//! rounding.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Connection id a timer is keyed on — the socket descriptor in practice.
pub type TimerId = i32;

/// A callback fired when its timer expires or is force-run via `do_work`.
pub type Callback = Box<dyn FnOnce() + Send>;

struct TimerNode {
    id: TimerId,
    expires: Instant,
    cb: Callback,
}

/// Indexed min-heap of [`TimerNode`]s ordered by `expires`.
///
/// Invariant, maintained after every public call: for every stored node,
/// `ref_[heap[i].id] == i`; `ref_` and `heap` have identical cardinality;
/// `heap[0]` (if any) holds the minimum `expires`.
pub struct TimerHeap {
    heap: Vec<TimerNode>,
    ref_: HashMap<TimerId, usize>,
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHeap {
    pub fn new() -> Self {
        TimerHeap { heap: Vec::with_capacity(64), ref_: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.ref_.contains_key(&id)
    }

    /// If `id` already has a timer, reschedules it to `now + timeout` with
    /// the new callback and re-heapifies; otherwise inserts a new node.
    pub fn add(&mut self, id: TimerId, timeout: Duration, cb: Callback) {
        match self.ref_.get(&id).copied() {
            Some(i) => {
                self.heap[i].expires = Instant::now() + timeout;
                self.heap[i].cb = cb;
                if !self.sift_down(i, self.heap.len()) {
                    self.sift_up(i);
                }
            }
            None => {
                let i = self.heap.len();
                self.ref_.insert(id, i);
                self.heap.push(TimerNode { id, expires: Instant::now() + timeout, cb });
                self.sift_up(i);
            }
        }
    }

    /// Reschedules an existing timer without changing its callback.
    /// Superseded by [`TimerHeap::add`]; kept for parity with the original
    /// interface. Precondition: `id` has a pending timer.
    pub fn adjust(&mut self, id: TimerId, timeout: Duration) {
        let i = *self.ref_.get(&id).expect("adjust on unknown timer id");
        self.heap[i].expires = Instant::now() + timeout;
        self.sift_down(i, self.heap.len());
    }

    /// Fires `id`'s callback immediately (regardless of expiry) and removes
    /// it. No-op if `id` has no pending timer.
    pub fn do_work(&mut self, id: TimerId) {
        if let Some(&i) = self.ref_.get(&id) {
            let node = self.delete(i);
            (node.cb)();
        }
    }

    /// Fires and pops every node whose `expires` has already passed.
    pub fn tick(&mut self) {
        let now = Instant::now();
        while let Some(node) = self.heap.first() {
            if node.expires > now {
                break;
            }
            let node = self.delete(0);
            (node.cb)();
        }
    }

    /// Removes the root without firing its callback.
    pub fn pop(&mut self) {
        if !self.heap.is_empty() {
            self.delete(0);
        }
    }

    /// Runs `tick()`, then returns how long until the next expiry, or
    /// `None` if the heap is empty (meaning "wait indefinitely").
    pub fn next_tick(&mut self) -> Option<Duration> {
        self.tick();
        self.heap.first().map(|node| node.expires.saturating_duration_since(Instant::now()))
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.ref_.clear();
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.ref_.insert(self.heap[i].id, i);
        self.ref_.insert(self.heap[j].id, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires <= self.heap[i].expires {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Bubbles `index` toward a leaf across `[index, n)`. Returns whether
    /// `index` actually moved.
    fn sift_down(&mut self, index: usize, n: usize) -> bool {
        let mut i = index;
        let mut j = i * 2 + 1;
        while j < n {
            if j + 1 < n && self.heap[j + 1].expires < self.heap[j].expires {
                j += 1;
            }
            if self.heap[i].expires <= self.heap[j].expires {
                break;
            }
            self.swap(i, j);
            i = j;
            j = i * 2 + 1;
        }
        i > index
    }

    fn delete(&mut self, index: usize) -> TimerNode {
        debug_assert!(!self.heap.is_empty() && index < self.heap.len());
        let tail = self.heap.len() - 1;
        if index < tail {
            self.swap(index, tail);
            if !self.sift_down(index, tail) {
                self.sift_up(index);
            }
        }
        let node = self.heap.pop().expect("heap non-empty by precondition");
        self.ref_.remove(&node.id);
        node
    }

    #[cfg(test)]
    fn is_heap(&self) -> bool {
        for i in 0..self.heap.len() {
            let left = i * 2 + 1;
            let right = i * 2 + 2;
            if left < self.heap.len() && self.heap[i].expires > self.heap[left].expires {
                return false;
            }
            if right < self.heap.len() && self.heap[i].expires > self.heap[right].expires {
                return false;
            }
        }
        self.ref_.len() == self.heap.len()
            && (0..self.heap.len()).all(|i| self.ref_.get(&self.heap[i].id) == Some(&i))
    }
}
