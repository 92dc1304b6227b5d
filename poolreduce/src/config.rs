//! Runtime-configurable parameters for the reduction client.
//!
//! All values have defaults matching a single-core, single-slot client.
//! Override via environment variables (prefixed `POOLREDUCE_`) or by
//! constructing a custom `ReduceConfig`.

use crate::error::{ReduceError, Result};
use crate::types::MAX_ELEMENT_SIZE;
use std::time::Duration;

/// Tuning parameters shared by every worker of a [`Reducer`](crate::Reducer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceConfig {
    /// Number of persistent worker threads.
    pub num_workers: usize,

    /// Number of channel slots (window size) per worker.
    pub slots_per_worker: usize,

    /// Bytes per chunk. Each slot carries one chunk at a time.
    pub message_size: usize,

    /// Native transfer unit of the substrate. Pool indices are counted in
    /// packets, so `message_size / packet_size` scales the slot position.
    pub packet_size: usize,

    /// Resend a chunk whose send completed this long ago without a result.
    /// `Duration::ZERO` disables retransmission.
    pub retransmit_timeout: Duration,

    /// Upper bound on notifications drained per poll. `None` uses
    /// `2 * slots_per_worker` (one send and one receive per slot).
    pub poll_batch: Option<usize>,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            slots_per_worker: 1,
            message_size: 4096,
            packet_size: 256,
            retransmit_timeout: Duration::from_millis(1),
            poll_batch: None,
        }
    }
}

impl ReduceConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `POOLREDUCE_WORKERS`
    /// - `POOLREDUCE_SLOTS_PER_WORKER`
    /// - `POOLREDUCE_MESSAGE_SIZE`
    /// - `POOLREDUCE_PACKET_SIZE`
    /// - `POOLREDUCE_RETRANSMIT_TIMEOUT_US` (0 disables retransmission)
    /// - `POOLREDUCE_POLL_BATCH`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());

        if let Some(n) = parse("POOLREDUCE_WORKERS") {
            cfg.num_workers = n;
        }
        if let Some(n) = parse("POOLREDUCE_SLOTS_PER_WORKER") {
            cfg.slots_per_worker = n;
        }
        if let Some(n) = parse("POOLREDUCE_MESSAGE_SIZE") {
            cfg.message_size = n;
        }
        if let Some(n) = parse("POOLREDUCE_PACKET_SIZE") {
            cfg.packet_size = n;
        }
        if let Some(us) = parse("POOLREDUCE_RETRANSMIT_TIMEOUT_US") {
            cfg.retransmit_timeout = Duration::from_micros(us as u64);
        }
        if let Some(n) = parse("POOLREDUCE_POLL_BATCH") {
            cfg.poll_batch = Some(n);
        }

        cfg
    }

    /// Check the invariants the protocol engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(ReduceError::invalid_config("num_workers", "must be at least 1"));
        }
        if self.slots_per_worker == 0 {
            return Err(ReduceError::invalid_config(
                "slots_per_worker",
                "must be at least 1",
            ));
        }
        if self.packet_size == 0 {
            return Err(ReduceError::invalid_config("packet_size", "must be non-zero"));
        }
        if self.message_size == 0 || self.message_size % self.packet_size != 0 {
            return Err(ReduceError::invalid_config(
                "message_size",
                format!(
                    "{} is not a non-zero multiple of packet_size {}",
                    self.message_size, self.packet_size
                ),
            ));
        }
        if self.message_size % MAX_ELEMENT_SIZE != 0 {
            return Err(ReduceError::invalid_config(
                "message_size",
                format!("must be a multiple of {MAX_ELEMENT_SIZE} bytes"),
            ));
        }
        if u32::try_from(self.message_size).is_err() {
            return Err(ReduceError::invalid_config(
                "message_size",
                "must fit in a 32-bit transfer length",
            ));
        }
        if self.poll_batch == Some(0) {
            return Err(ReduceError::invalid_config("poll_batch", "must be non-zero"));
        }

        // Highest tag: last slot's base, scaled, shifted for the parity bit.
        let highest = (self.total_slots() as u64)
            .checked_mul(self.packets_per_message() as u64)
            .and_then(|v| v.checked_mul(2));
        match highest {
            Some(v) if v <= u32::MAX as u64 => Ok(()),
            _ => Err(ReduceError::invalid_config(
                "slots_per_worker",
                "pool indices overflow the 32-bit sequence tag",
            )),
        }
    }

    /// Slots across all workers of one participant.
    pub fn total_slots(&self) -> usize {
        self.num_workers * self.slots_per_worker
    }

    /// Packets per message; the scale applied to pool indices in tags.
    pub fn packets_per_message(&self) -> usize {
        self.message_size / self.packet_size
    }

    /// Effective notification batch size per poll.
    pub fn poll_batch(&self) -> usize {
        self.poll_batch.unwrap_or(2 * self.slots_per_worker)
    }

    /// Whether timeout-driven retransmission is active.
    pub fn retransmission_enabled(&self) -> bool {
        !self.retransmit_timeout.is_zero()
    }
}
