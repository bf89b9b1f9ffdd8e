//! The time-ordered deferred-call queue.
//!
//! A deferred call is a `(due_time, thunk)` pair, kept ordered by
//! `due_time` ascending. Cancellation is by identity: a [`DeferredHandle`]
//! is a cheap `Copy` ticket compared for
//! equality, and removal is a linear scan — the queue's expected depth is
//! shallow (one IPC timeout per open connection, one rescan timer), so this
//! trades a tiny bit of cancel-time work for not needing an index.

use std::time::Instant;

pub type Thunk = Box<dyn FnOnce()>;

/// Ticket returned by [`DeferredQueue::insert`], usable to cancel the call
/// later. Cancellation after the call has already fired (or after it was
/// already cancelled) is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeferredHandle(u64);

struct Entry {
    id: u64,
    due: Instant,
    thunk: Thunk,
}

/// Queue of pending deferred calls, ordered by `due` ascending.
#[derive(Default)]
pub struct DeferredQueue {
    entries: Vec<Entry>,
    next_id: u64,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a thunk due at `due`, keeping the queue ordered.
    pub fn insert(&mut self, due: Instant, thunk: Thunk) -> DeferredHandle {
        let id = self.next_id;
        self.next_id += 1;

        let pos = self.entries.partition_point(|e| e.due <= due);
        self.entries.insert(pos, Entry { id, due, thunk });

        DeferredHandle(id)
    }

    /// Remove a pending call by handle. No-op if already fired or absent.
    pub fn cancel(&mut self, handle: DeferredHandle) {
        if let Some(pos) = self.entries.iter().position(|e| e.id == handle.0) {
            self.entries.remove(pos);
        }
    }

    /// Drop every pending call without running it. Used when the reactor is
    /// stopping: periodic housekeeping (like the sensor rescan timer) has
    /// nothing left to do once every object has been asked to close, and
    /// shouldn't hold the loop open until its next tick.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Due time of the head entry, if any.
    pub fn next_due(&self) -> Option<Instant> {
        self.entries.first().map(|e| e.due)
    }

    /// Pop and return every thunk whose `due` has elapsed as of `now`
    /// (inclusive). Callers invoke the returned thunks after releasing any
    /// borrow on the queue, since a thunk may itself schedule new calls.
    pub fn drain_due(&mut self, now: Instant) -> Vec<Thunk> {
        let split = self.entries.partition_point(|e| e.due <= now);
        self.entries
            .drain(..split)
            .map(|e| e.thunk)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn ordered(queue: &DeferredQueue) -> Vec<u64> {
        queue.entries.iter().map(|e| e.id).collect()
    }

    #[test]
    fn stays_ordered_by_due_time_after_insert() {
        let base = Instant::now();
        let mut q = DeferredQueue::new();
        q.insert(base + Duration::from_secs(5), Box::new(|| {}));
        q.insert(base + Duration::from_secs(1), Box::new(|| {}));
        q.insert(base + Duration::from_secs(3), Box::new(|| {}));

        let dues: Vec<_> = q.entries.iter().map(|e| e.due).collect();
        let mut sorted = dues.clone();
        sorted.sort();
        assert_eq!(dues, sorted);
    }

    #[test]
    fn cancel_by_identity_is_idempotent() {
        let base = Instant::now();
        let mut q = DeferredQueue::new();
        let h = q.insert(base, Box::new(|| {}));
        assert_eq!(ordered(&q).len(), 1);
        q.cancel(h);
        assert!(q.is_empty());
        // Cancelling again, or cancelling a handle that never fired anything
        // real, must not panic.
        q.cancel(h);
        assert!(q.is_empty());
    }

    #[test]
    fn drain_due_only_takes_elapsed_entries() {
        let base = Instant::now();
        let mut q = DeferredQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let log1 = log.clone();
        q.insert(base, Box::new(move || log1.borrow_mut().push(1)));
        let log2 = log.clone();
        q.insert(base + Duration::from_secs(10), Box::new(move || log2.borrow_mut().push(2)));

        let due = q.drain_due(base);
        assert_eq!(due.len(), 1);
        for thunk in due {
            thunk();
        }
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(q.next_due(), Some(base + Duration::from_secs(10)));
    }

    #[test]
    fn ordered_after_every_insert_and_pop() {
        let base = Instant::now();
        let mut q = DeferredQueue::new();
        for n in [7u64, 2, 9, 1, 5] {
            q.insert(base + Duration::from_millis(n), Box::new(|| {}));
            let dues: Vec<_> = q.entries.iter().map(|e| e.due).collect();
            let mut sorted = dues.clone();
            sorted.sort();
            assert_eq!(dues, sorted);
        }
        let _ = q.drain_due(base + Duration::from_millis(100));
        assert!(q.is_empty());
    }
}
