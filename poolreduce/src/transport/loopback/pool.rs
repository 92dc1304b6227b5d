//! Aggregation state for one pool index.
//!
//! Each pool index has two sets, one per tag parity. A participant fills
//! set `p` with chunk `k` and set `1 - p` with chunk `k + N` on the same
//! slot, so while one set is being filled the other still holds the
//! previous result for participants that have not yet seen it.

use crate::reduce::accumulate;
use crate::types::{DataType, WorkerId};

/// Where a participant wants a result written and announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Destination {
    pub addr: u64,
    pub length: usize,
    pub worker: WorkerId,
    pub slot: usize,
}

/// What the switch should do after a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// First contribution from this rank; set still incomplete.
    Accepted,
    /// Duplicate of a contribution to an incomplete set.
    Ignored,
    /// Duplicate of a contribution to a complete set: send the result to
    /// this rank only.
    Resend,
    /// Last contribution arrived: send the result to every rank.
    Completed,
}

#[derive(Debug)]
struct ParitySet {
    members: Vec<Option<Destination>>,
    count: usize,
    accumulator: Vec<u8>,
    length: usize,
    complete: bool,
}

impl ParitySet {
    fn new(world_size: usize, message_size: usize) -> Self {
        Self {
            members: vec![None; world_size],
            count: 0,
            accumulator: vec![0; message_size],
            length: 0,
            complete: false,
        }
    }

    fn reset(&mut self) {
        self.members.fill(None);
        self.count = 0;
        self.length = 0;
        self.complete = false;
    }

    /// Clear `rank`'s membership; reset once the set is empty.
    fn release(&mut self, rank: usize) {
        if self.members[rank].take().is_some() {
            self.count -= 1;
            if self.count == 0 {
                self.reset();
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct PoolEntry {
    sets: [ParitySet; 2],
}

impl PoolEntry {
    pub fn new(world_size: usize, message_size: usize) -> Self {
        Self {
            sets: [
                ParitySet::new(world_size, message_size),
                ParitySet::new(world_size, message_size),
            ],
        }
    }

    /// Fold `data` from `rank` into the set selected by `parity`.
    ///
    /// `data` must not exceed the message size the entry was created with.
    pub fn contribute(
        &mut self,
        rank: usize,
        parity: u32,
        data: &[u8],
        dtype: DataType,
        destination: Destination,
    ) -> Outcome {
        let p = (parity & 1) as usize;

        if self.sets[p].members[rank].is_some() {
            return if self.sets[p].complete {
                Outcome::Resend
            } else {
                Outcome::Ignored
            };
        }

        // The rank has moved past the other set's chunk.
        self.sets[1 - p].release(rank);

        let set = &mut self.sets[p];
        let len = data.len();
        if set.count == 0 {
            set.accumulator[..len].copy_from_slice(data);
        } else {
            if len > set.length {
                set.accumulator[set.length..len].fill(0);
            }
            accumulate(&mut set.accumulator[..len], data, dtype);
        }
        set.length = set.length.max(len);
        set.members[rank] = Some(destination);
        set.count += 1;

        if set.count == set.members.len() {
            set.complete = true;
            Outcome::Completed
        } else {
            Outcome::Accepted
        }
    }

    /// Aggregated bytes of a set.
    pub fn result(&self, parity: u32) -> &[u8] {
        let set = &self.sets[(parity & 1) as usize];
        &set.accumulator[..set.length]
    }

    /// Registered destinations of a set, indexed by rank.
    pub fn destinations(&self, parity: u32) -> &[Option<Destination>] {
        &self.sets[(parity & 1) as usize].members
    }

    #[cfg(test)]
    fn members(&self, parity: u32) -> usize {
        self.sets[(parity & 1) as usize].count
    }
}
