//! Partitioning a job's chunks across workers.

use crate::types::WorkerId;
use std::ops::Range;

/// Number of message-sized chunks in a job of `len_bytes`.
///
/// Never zero: an empty job still performs one (zero-byte) round trip so
/// every participant passes through the switch.
pub fn total_chunks(len_bytes: usize, message_size: usize) -> usize {
    len_bytes.div_ceil(message_size).max(1)
}

/// Half-open range of global chunk indices owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkRange {
    pub start: usize,
    pub end: usize,
}

impl ChunkRange {
    /// Even split of `total` chunks across `workers`; the first
    /// `total % workers` workers take one extra chunk.
    pub fn for_worker(total: usize, workers: usize, worker: WorkerId) -> Self {
        debug_assert!(workers > 0 && worker < workers);
        let base = total / workers;
        let rem = total % workers;
        let count = base + usize::from(worker < rem);
        let start = worker * base + worker.min(rem);
        Self {
            start,
            end: start + count,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The range holding only `chunk`.
    pub fn single(chunk: usize) -> Self {
        Self {
            start: chunk,
            end: chunk + 1,
        }
    }

    pub fn contains(&self, chunk: usize) -> bool {
        (self.start..self.end).contains(&chunk)
    }

    /// Byte range covered by this worker within a job of `len_bytes`.
    pub fn byte_range(&self, message_size: usize, len_bytes: usize) -> Range<usize> {
        let start = (self.start * message_size).min(len_bytes);
        let end = (self.end * message_size).min(len_bytes);
        start..end
    }
}

impl std::fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
