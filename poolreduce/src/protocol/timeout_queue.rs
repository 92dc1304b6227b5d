//! O(1) "time of last send" tracking for a fixed set of slots.
//!
//! Entries form a doubly linked list threaded through a fixed arena, with
//! one extra sentinel entry as the tail. The newest entry sits at the head;
//! because entries are only ever pushed at "now", the entry linked just
//! before the sentinel is the oldest, and checking it alone decides whether
//! any timeout has fired.

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Entry {
    timestamp: u64,
    previous: usize,
    next: usize,
}

impl Entry {
    const EMPTY: Entry = Entry {
        timestamp: 0,
        previous: NIL,
        next: NIL,
    };
}

/// Ordered set of `(slot, timestamp)` pairs, newest first.
#[derive(Debug, Clone)]
pub struct TimeoutQueue {
    entries: Vec<Entry>,
    head: usize,
    len: usize,
}

impl TimeoutQueue {
    /// Create a queue able to hold one entry for each of `slots` slots.
    pub fn new(slots: usize) -> Self {
        Self {
            entries: vec![Entry::EMPTY; slots + 1],
            head: slots,
            len: 0,
        }
    }

    fn tail(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `slot` currently has an entry.
    pub fn contains(&self, slot: usize) -> bool {
        slot < self.tail() && (self.entries[slot].next != NIL)
    }

    /// Insert or refresh `slot` at the head with `timestamp`.
    ///
    /// Timestamps are expected to be non-decreasing; an older timestamp
    /// than the current head breaks the oldest-at-tail ordering and is
    /// reported, not corrected.
    pub fn push(&mut self, slot: usize, timestamp: u64) {
        if slot >= self.tail() {
            return;
        }

        if let Some((newest_slot, newest)) = self.newest()
            && newest_slot != slot
            && timestamp < newest
        {
            tracing::warn!(
                slot,
                timestamp,
                newest_slot,
                newest,
                "timeout queue: out-of-order insert"
            );
        }

        self.remove(slot);

        let head = self.head;
        self.entries[slot] = Entry {
            timestamp,
            previous: NIL,
            next: head,
        };
        self.entries[head].previous = slot;
        self.head = slot;
        self.len += 1;
    }

    /// Unlink `slot`. Removing an absent entry is a no-op.
    pub fn remove(&mut self, slot: usize) {
        if !self.contains(slot) {
            return;
        }

        let Entry { previous, next, .. } = self.entries[slot];
        if previous != NIL {
            self.entries[previous].next = next;
        }
        // Linked entries always have a successor (another entry or the tail).
        self.entries[next].previous = previous;
        if self.head == slot {
            self.head = next;
        }

        self.entries[slot] = Entry::EMPTY;
        self.len -= 1;
    }

    /// The least recently pushed entry.
    pub fn oldest(&self) -> Option<(usize, u64)> {
        let slot = self.entries[self.tail()].previous;
        (slot != NIL).then(|| (slot, self.entries[slot].timestamp))
    }

    /// The most recently pushed entry.
    pub fn newest(&self) -> Option<(usize, u64)> {
        (self.head != self.tail()).then(|| (self.head, self.entries[self.head].timestamp))
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.fill(Entry::EMPTY);
        self.head = self.tail();
        self.len = 0;
    }
}
