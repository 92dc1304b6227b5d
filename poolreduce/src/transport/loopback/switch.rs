use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_queue::SegQueue;

use super::loss::{LossModel, LossSampler};
use super::pool::{Destination, Outcome, PoolEntry};
use crate::config::ReduceConfig;
use crate::error::{ReduceError, Result};
use crate::protocol::SequenceTag;
use crate::transport::channel::{ChannelGroup, Fabric, Notification, Transfer};
use crate::types::{Rank, WorkerId};

/// Counters kept by the loopback switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchStats {
    /// New contributions folded into a set.
    pub contributions: u64,
    /// Contributions repeated for a set that was still filling.
    pub duplicates: u64,
    /// Sets that received every participant's contribution.
    pub completions: u64,
    /// Results re-sent to one participant after a repeated contribution.
    pub resends: u64,
    pub ingress_dropped: u64,
    pub egress_dropped: u64,
    /// Results lost because the destination slot had no receive posted.
    pub no_credit_dropped: u64,
    /// Results delivered a second time into a later receive.
    pub egress_duplicated: u64,
}

struct Endpoint {
    credits: Vec<usize>,
    /// Duplicate result per slot, waiting for the next posted receive.
    delayed: Vec<Option<SequenceTag>>,
    queue: Arc<SegQueue<Notification>>,
}

struct SwitchState {
    pools: HashMap<u32, PoolEntry>,
    endpoints: HashMap<(Rank, WorkerId), Endpoint>,
    loss: LossSampler,
    stats: SwitchStats,
}

struct SwitchInner {
    world_size: usize,
    message_size: usize,
    packets_per_message: u32,
    state: Mutex<SwitchState>,
}

impl SwitchInner {
    fn lock(&self) -> Result<MutexGuard<'_, SwitchState>> {
        self.state
            .lock()
            .map_err(|_| ReduceError::LockPoisoned("loopback switch"))
    }
}

/// In-process aggregation switch shared by `world_size` participants.
///
/// Participants post their chunk of a pool index; once every participant
/// has contributed, the sum is written to each participant's destination
/// address and a receive carrying the tag is queued on its slot.
///
/// Transfers carry raw addresses. Every address posted through a group
/// must stay valid for reads and writes until the posting participant has
/// received the matching result.
#[derive(Clone)]
pub struct LoopbackSwitch {
    inner: Arc<SwitchInner>,
}

impl LoopbackSwitch {
    pub fn new(world_size: usize, config: &ReduceConfig) -> Result<Self> {
        Self::with_loss(world_size, config, LossModel::lossless())
    }

    pub fn with_loss(world_size: usize, config: &ReduceConfig, loss: LossModel) -> Result<Self> {
        config.validate()?;
        loss.validate()?;
        if world_size == 0 {
            return Err(ReduceError::invalid_config(
                "world_size",
                "switch needs at least one participant",
            ));
        }
        if !loss.is_lossless() && !config.retransmission_enabled() {
            tracing::warn!(
                ?loss,
                "lossy loopback switch without retransmission will stall"
            );
        }

        Ok(Self {
            inner: Arc::new(SwitchInner {
                world_size,
                message_size: config.message_size,
                packets_per_message: config.packets_per_message() as u32,
                state: Mutex::new(SwitchState {
                    pools: HashMap::new(),
                    endpoints: HashMap::new(),
                    loss: LossSampler::new(loss),
                    stats: SwitchStats::default(),
                }),
            }),
        })
    }

    pub fn world_size(&self) -> usize {
        self.inner.world_size
    }

    /// Channel factory for participant `rank`.
    pub fn fabric(&self, rank: Rank) -> LoopbackFabric {
        LoopbackFabric {
            rank,
            switch: Arc::clone(&self.inner),
        }
    }

    pub fn stats(&self) -> Result<SwitchStats> {
        Ok(self.inner.lock()?.stats)
    }
}

/// [`Fabric`] handing out loopback groups for one participant.
#[derive(Clone)]
pub struct LoopbackFabric {
    rank: Rank,
    switch: Arc<SwitchInner>,
}

impl LoopbackFabric {
    pub fn rank(&self) -> Rank {
        self.rank
    }
}

impl Fabric for LoopbackFabric {
    fn create_group(&self, worker: WorkerId, slots: usize) -> Result<Box<dyn ChannelGroup>> {
        if self.rank as usize >= self.switch.world_size {
            return Err(ReduceError::channel(format!(
                "rank {} outside switch of {} participants",
                self.rank, self.switch.world_size
            )));
        }

        let queue = Arc::new(SegQueue::new());
        let mut state = self.switch.lock()?;
        let replaced = state
            .endpoints
            .insert(
                (self.rank, worker),
                Endpoint {
                    credits: vec![0; slots],
                    delayed: vec![None; slots],
                    queue: Arc::clone(&queue),
                },
            )
            .is_some();
        drop(state);
        if replaced {
            tracing::warn!(rank = self.rank, worker, "loopback group re-created");
        }

        Ok(Box::new(LoopbackGroup {
            rank: self.rank,
            worker,
            slots,
            switch: Arc::clone(&self.switch),
            queue,
        }))
    }
}

/// One worker's channels into the loopback switch.
pub struct LoopbackGroup {
    rank: Rank,
    worker: WorkerId,
    slots: usize,
    switch: Arc<SwitchInner>,
    queue: Arc<SegQueue<Notification>>,
}

impl LoopbackGroup {
    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.slots {
            return Err(ReduceError::UnknownSlot {
                slot,
                slots: self.slots,
            });
        }
        Ok(())
    }
}

impl ChannelGroup for LoopbackGroup {
    fn len(&self) -> usize {
        self.slots
    }

    fn post_transfer(&mut self, slot: usize, transfer: &Transfer) -> Result<()> {
        self.check_slot(slot)?;
        if transfer.length > self.switch.message_size {
            return Err(ReduceError::ChannelPost {
                slot,
                reason: format!(
                    "{} bytes exceeds message size {}",
                    transfer.length, self.switch.message_size
                ),
            });
        }

        let mut guard = self.switch.lock()?;
        let SwitchState {
            pools,
            endpoints,
            loss,
            stats,
        } = &mut *guard;

        self.queue.push(Notification::send_complete(slot));
        if loss.drop_ingress() {
            stats.ingress_dropped += 1;
            tracing::trace!(rank = self.rank, worker = self.worker, slot, tag = %transfer.tag, "ingress drop");
            return Ok(());
        }

        // SAFETY: the posting participant keeps `local_addr..+length`
        // valid until its result arrives (type-level docs), and every
        // access to posted regions happens under the switch lock.
        let data = unsafe {
            std::slice::from_raw_parts(transfer.local_addr as *const u8, transfer.length)
        };

        let pool_index = transfer.tag.message_index(self.switch.packets_per_message);
        let parity = transfer.tag.parity();
        let entry = pools
            .entry(pool_index)
            .or_insert_with(|| PoolEntry::new(self.switch.world_size, self.switch.message_size));
        let destination = Destination {
            addr: transfer.remote_addr,
            length: transfer.length,
            worker: self.worker,
            slot,
        };

        let rank = self.rank as usize;
        match entry.contribute(rank, parity, data, transfer.dtype, destination) {
            Outcome::Accepted => stats.contributions += 1,
            Outcome::Ignored => stats.duplicates += 1,
            Outcome::Resend => {
                stats.resends += 1;
                if let Some(dest) = entry.destinations(parity)[rank] {
                    deliver(entry.result(parity), rank, dest, transfer.tag, endpoints, loss, stats);
                }
            }
            Outcome::Completed => {
                stats.contributions += 1;
                stats.completions += 1;
                let result = entry.result(parity);
                for (r, dest) in entry.destinations(parity).iter().enumerate() {
                    if let Some(dest) = dest {
                        deliver(result, r, *dest, transfer.tag, endpoints, loss, stats);
                    }
                }
            }
        }
        Ok(())
    }

    fn repost_receive(&mut self, slot: usize) -> Result<()> {
        self.check_slot(slot)?;
        let mut state = self.switch.lock()?;
        let endpoint = state
            .endpoints
            .get_mut(&(self.rank, self.worker))
            .ok_or_else(|| ReduceError::ReceiveRepost {
                slot,
                reason: "group no longer registered with switch".into(),
            })?;
        match endpoint.delayed[slot].take() {
            Some(tag) => {
                tracing::trace!(rank = self.rank, worker = self.worker, slot, %tag, "duplicate result");
                endpoint.queue.push(Notification::receive(slot, tag));
            }
            None => endpoint.credits[slot] += 1,
        }
        Ok(())
    }

    fn poll(&mut self, out: &mut Vec<Notification>, max: usize) -> Result<usize> {
        let mut n = 0;
        while n < max {
            let Some(notification) = self.queue.pop() else {
                break;
            };
            out.push(notification);
            n += 1;
        }
        Ok(n)
    }
}

/// Write `result` into `rank`'s destination and queue its receive.
fn deliver(
    result: &[u8],
    rank: usize,
    dest: Destination,
    tag: SequenceTag,
    endpoints: &mut HashMap<(Rank, WorkerId), Endpoint>,
    loss: &mut LossSampler,
    stats: &mut SwitchStats,
) {
    if loss.drop_egress() {
        stats.egress_dropped += 1;
        tracing::trace!(rank, slot = dest.slot, %tag, "egress drop");
        return;
    }
    let Some(endpoint) = endpoints.get_mut(&(rank as Rank, dest.worker)) else {
        stats.egress_dropped += 1;
        return;
    };
    let Some(credit) = endpoint.credits.get_mut(dest.slot).filter(|c| **c > 0) else {
        stats.no_credit_dropped += 1;
        tracing::trace!(rank, slot = dest.slot, %tag, "no receive posted, result dropped");
        return;
    };
    *credit -= 1;

    let len = dest.length.min(result.len());
    // SAFETY: `dest.addr` was posted by `rank`, which is still waiting
    // for this result; see `LoopbackSwitch` docs.
    unsafe {
        std::ptr::copy_nonoverlapping(result.as_ptr(), dest.addr as *mut u8, len);
    }
    endpoint.queue.push(Notification::receive(dest.slot, tag));
    if loss.duplicate_egress() {
        stats.egress_duplicated += 1;
        endpoint.delayed[dest.slot] = Some(tag);
    }
}
