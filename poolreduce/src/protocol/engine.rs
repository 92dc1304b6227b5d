//! Per-worker window protocol engine.
//!
//! Each of the `N` slots carries one chunk at a time. Chunks of the worker's
//! range are dealt round-robin: slot `i` carries chunks `start + i`,
//! `start + i + N`, and so on. A slot advances only when a receive carrying
//! its current tag (same slot, same parity) arrives; anything else is a
//! stale duplicate and only re-arms the receive.
//!
//! The engine counts two operations per chunk (the post and the genuine
//! acknowledgment) and `run` returns once the count reaches zero.

use std::sync::Arc;

use crate::config::ReduceConfig;
use crate::error::{ReduceError, Result};
use crate::protocol::clock::Clock;
use crate::protocol::range::{ChunkRange, total_chunks};
use crate::protocol::tag::SequenceTag;
use crate::protocol::timeout_queue::TimeoutQueue;
use crate::transport::channel::{
    ChannelGroup, CompletionStatus, Notification, NotificationKind, Transfer,
};
use crate::types::{ReductionJob, WorkerId};

/// Counters accumulated over the engine's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Chunks posted for the first time.
    pub chunks_posted: u64,
    /// Genuine acknowledgments.
    pub chunks_acked: u64,
    /// Receives whose tag did not match the slot's in-flight chunk.
    pub stale_notifications: u64,
    /// Timeout-driven resends of an in-flight chunk.
    pub retransmissions: u64,
    pub send_completions: u64,
}

impl EngineStats {
    pub fn merge(&mut self, other: &EngineStats) {
        self.chunks_posted += other.chunks_posted;
        self.chunks_acked += other.chunks_acked;
        self.stale_notifications += other.stale_notifications;
        self.retransmissions += other.retransmissions;
        self.send_completions += other.send_completions;
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    tag: SequenceTag,
    next_chunk: usize,
    in_flight: Option<Transfer>,
}

/// Window state machine for one worker thread.
pub struct WindowEngine<G> {
    worker: WorkerId,
    num_workers: usize,
    group: G,
    clock: Arc<dyn Clock>,
    message_size: usize,
    packets_per_message: u32,
    /// Zero disables retransmission.
    timeout_nanos: u64,
    poll_batch: usize,
    slots: Vec<Slot>,
    timeouts: TimeoutQueue,
    job: Option<ReductionJob>,
    range: ChunkRange,
    outstanding: usize,
    notifications: Vec<Notification>,
    stats: EngineStats,
}

impl<G: ChannelGroup> WindowEngine<G> {
    /// Bind `group` to worker `worker`. The group must expose exactly
    /// `config.slots_per_worker` slots.
    pub fn new(
        worker: WorkerId,
        group: G,
        config: &ReduceConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let n = config.slots_per_worker;
        if group.len() != n {
            return Err(ReduceError::channel(format!(
                "worker {worker}: group has {} slots, expected {n}",
                group.len()
            )));
        }
        if worker >= config.num_workers {
            return Err(ReduceError::invalid_config(
                "num_workers",
                format!("worker {worker} out of range for {} workers", config.num_workers),
            ));
        }

        let packets_per_message = config.packets_per_message() as u32;
        let slots = (0..n)
            .map(|i| Slot {
                tag: SequenceTag::for_slot((worker * n + i) as u32, packets_per_message),
                next_chunk: 0,
                in_flight: None,
            })
            .collect();

        Ok(Self {
            worker,
            num_workers: config.num_workers,
            group,
            clock,
            message_size: config.message_size,
            packets_per_message,
            timeout_nanos: config.retransmit_timeout.as_nanos() as u64,
            poll_batch: config.poll_batch(),
            slots,
            timeouts: TimeoutQueue::new(n),
            job: None,
            range: ChunkRange::default(),
            outstanding: 0,
            notifications: Vec::with_capacity(config.poll_batch()),
            stats: EngineStats::default(),
        })
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Operations (posts plus acknowledgments) still owed for the current job.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn range(&self) -> ChunkRange {
        self.range
    }

    /// Tag most recently posted on `slot`.
    pub fn slot_tag(&self, slot: usize) -> SequenceTag {
        self.slots[slot].tag
    }

    /// Chunk currently awaiting acknowledgment on `slot`, if any.
    pub fn in_flight(&self, slot: usize) -> Option<Transfer> {
        self.slots[slot].in_flight
    }

    /// Arm one receive per slot. Call once before the first job.
    pub fn arm_receives(&mut self) -> Result<()> {
        for slot in 0..self.slots.len() {
            self.group.repost_receive(slot)?;
        }
        Ok(())
    }

    /// Take ownership of this worker's share of `job` and reset per-job state.
    pub fn compute_range(&mut self, job: &ReductionJob) -> ChunkRange {
        let total = total_chunks(job.len_bytes, self.message_size);
        let range = ChunkRange::for_worker(total, self.num_workers, self.worker);

        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.next_chunk = range.start + i;
            slot.in_flight = None;
        }
        self.timeouts.clear();
        self.job = Some(*job);
        self.range = range;
        self.outstanding = 2 * range.len();

        tracing::debug!(
            worker = self.worker,
            reduction_id = job.reduction_id,
            total_chunks = total,
            range = %range,
            "computed chunk range"
        );
        range
    }

    /// Post `slot`'s next chunk, or mark the slot idle when its share of
    /// the range is exhausted.
    pub fn post(&mut self, slot: usize) -> Result<()> {
        let Some(job) = self.job else {
            return Ok(());
        };
        let n = self.slots.len();
        let state = &mut self.slots[slot];
        if !self.range.contains(state.next_chunk) {
            state.in_flight = None;
            return Ok(());
        }

        let bytes =
            ChunkRange::single(state.next_chunk).byte_range(self.message_size, job.len_bytes);
        let length = bytes.len();
        state.tag.flip();
        let addr = job.addr + bytes.start as u64;
        let transfer = Transfer {
            local_addr: addr,
            length,
            remote_addr: addr,
            tag: state.tag,
            dtype: job.dtype,
        };

        tracing::trace!(
            worker = self.worker,
            slot,
            chunk = state.next_chunk,
            length,
            tag = %transfer.tag,
            "post"
        );
        self.group.post_transfer(slot, &transfer)?;

        let state = &mut self.slots[slot];
        state.in_flight = Some(transfer);
        state.next_chunk += n;
        self.outstanding -= 1;
        self.stats.chunks_posted += 1;
        Ok(())
    }

    /// Handle a result notification on `slot`.
    ///
    /// Returns whether it acknowledged the slot's in-flight chunk.
    pub fn on_receive(&mut self, slot: usize, received: Option<SequenceTag>) -> Result<bool> {
        self.group.repost_receive(slot)?;

        let genuine = match (self.slots[slot].in_flight, received) {
            (Some(transfer), Some(tag)) => transfer.tag.is_current(tag, self.packets_per_message),
            _ => false,
        };
        if !genuine {
            self.stats.stale_notifications += 1;
            tracing::trace!(
                worker = self.worker,
                slot,
                expected = %self.slots[slot].tag,
                received = ?received.map(|t| t.to_string()),
                "stale notification"
            );
            return Ok(false);
        }

        self.timeouts.remove(slot);
        self.stats.chunks_acked += 1;
        self.post(slot)?;
        self.outstanding -= 1;
        Ok(true)
    }

    /// A transfer left `slot`; restart its retransmission timer.
    pub fn on_send_ack(&mut self, slot: usize) {
        self.stats.send_completions += 1;
        if self.timeout_nanos > 0 && self.slots[slot].in_flight.is_some() {
            self.timeouts.push(slot, self.clock.now_nanos());
        }
    }

    /// Resend the oldest in-flight chunk if its timer expired at `now`.
    ///
    /// Only the oldest entry is inspected. Returns the retransmitted slot.
    pub fn check_timeouts(&mut self, now: u64) -> Result<Option<usize>> {
        if self.timeout_nanos == 0 {
            return Ok(None);
        }
        let Some((slot, sent_at)) = self.timeouts.oldest() else {
            return Ok(None);
        };
        if now.saturating_sub(sent_at) <= self.timeout_nanos {
            return Ok(None);
        }

        // Re-added when the resend's completion arrives.
        self.timeouts.remove(slot);
        let Some(transfer) = self.slots[slot].in_flight else {
            return Ok(None);
        };
        self.group.post_transfer(slot, &transfer)?;
        self.stats.retransmissions += 1;
        tracing::debug!(
            worker = self.worker,
            slot,
            tag = %transfer.tag,
            waited_ns = now - sent_at,
            "retransmit"
        );
        Ok(Some(slot))
    }

    /// Dispatch one notification. Error statuses are returned as errors.
    pub fn handle(&mut self, notification: &Notification) -> Result<()> {
        let slot = notification.slot;
        if slot >= self.slots.len() {
            return Err(ReduceError::UnknownSlot {
                slot,
                slots: self.slots.len(),
            });
        }
        if let CompletionStatus::Failed(status) = &notification.status {
            return Err(ReduceError::CompletionFailed {
                slot,
                status: status.clone(),
            });
        }
        match notification.kind {
            NotificationKind::Receive => {
                self.on_receive(slot, notification.tag)?;
            }
            NotificationKind::SendComplete => self.on_send_ack(slot),
        }
        Ok(())
    }

    /// Post the first chunk on every slot.
    pub fn start(&mut self) -> Result<()> {
        for slot in 0..self.slots.len() {
            self.post(slot)?;
        }
        Ok(())
    }

    /// One poll iteration: drain notifications, dispatch them, then check
    /// the oldest timer. Returns the number of notifications handled.
    pub fn poll_once(&mut self) -> Result<usize> {
        let mut batch = std::mem::take(&mut self.notifications);
        batch.clear();
        let polled = self.group.poll(&mut batch, self.poll_batch);
        let dispatched = polled.and_then(|_| batch.iter().try_for_each(|n| self.handle(n)));
        let count = batch.len();
        self.notifications = batch;
        dispatched?;

        if self.timeout_nanos > 0 {
            let now = self.clock.now_nanos();
            self.check_timeouts(now)?;
        }
        Ok(count)
    }

    /// Drive `job`'s share to completion: every chunk in this worker's
    /// range posted and acknowledged.
    pub fn run(&mut self, job: &ReductionJob) -> Result<()> {
        self.compute_range(job);
        self.start()?;
        while self.outstanding > 0 {
            if self.poll_once()? == 0 {
                std::hint::spin_loop();
            }
        }
        tracing::trace!(
            worker = self.worker,
            reduction_id = job.reduction_id,
            "range complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::clock::ManualClock;
    use crate::types::DataType;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Records every call and hands back pre-queued notifications.
    #[derive(Default)]
    struct ScriptedGroup {
        slots: usize,
        posts: Vec<(usize, Transfer)>,
        reposts: Vec<usize>,
        queue: VecDeque<Notification>,
        fail_posts: bool,
    }

    impl ScriptedGroup {
        fn new(slots: usize) -> Self {
            Self {
                slots,
                ..Default::default()
            }
        }
    }

    impl ChannelGroup for ScriptedGroup {
        fn len(&self) -> usize {
            self.slots
        }

        fn post_transfer(&mut self, slot: usize, transfer: &Transfer) -> Result<()> {
            if self.fail_posts {
                return Err(ReduceError::ChannelPost {
                    slot,
                    reason: "send queue full".into(),
                });
            }
            self.posts.push((slot, *transfer));
            Ok(())
        }

        fn repost_receive(&mut self, slot: usize) -> Result<()> {
            self.reposts.push(slot);
            Ok(())
        }

        fn poll(&mut self, out: &mut Vec<Notification>, max: usize) -> Result<usize> {
            let n = max.min(self.queue.len());
            out.extend(self.queue.drain(..n));
            Ok(n)
        }
    }

    fn config(workers: usize, slots: usize) -> ReduceConfig {
        ReduceConfig {
            num_workers: workers,
            slots_per_worker: slots,
            message_size: 64,
            packet_size: 16,
            retransmit_timeout: Duration::from_micros(100),
            poll_batch: None,
        }
    }

    fn job(chunks: usize) -> ReductionJob {
        ReductionJob {
            addr: 0x10_000,
            len_bytes: chunks * 64,
            dtype: DataType::F32,
            reduction_id: 1,
        }
    }

    fn engine(workers: usize, worker: usize, slots: usize) -> (WindowEngine<ScriptedGroup>, ManualClock) {
        let clock = ManualClock::new();
        let engine = WindowEngine::new(
            worker,
            ScriptedGroup::new(slots),
            &config(workers, slots),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (engine, clock)
    }

    /// Acknowledge whatever `slot` currently has in flight.
    fn ack(engine: &mut WindowEngine<ScriptedGroup>, slot: usize) -> bool {
        let tag = engine.in_flight(slot).unwrap().tag;
        engine.on_receive(slot, Some(tag)).unwrap()
    }

    #[test]
    fn test_rejects_group_size_mismatch() {
        let err = WindowEngine::new(
            0,
            ScriptedGroup::new(3),
            &config(1, 2),
            Arc::new(ManualClock::new()),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_compute_range_sets_outstanding() {
        let (mut e, _) = engine(2, 0, 2);
        let range = e.compute_range(&job(5));
        assert_eq!(range, ChunkRange { start: 0, end: 3 });
        assert_eq!(e.outstanding(), 6);

        let (mut e, _) = engine(2, 1, 2);
        assert_eq!(e.compute_range(&job(5)), ChunkRange { start: 3, end: 5 });
        assert_eq!(e.outstanding(), 4);
    }

    #[test]
    fn test_start_interleaves_chunks_across_slots() {
        let (mut e, _) = engine(1, 0, 2);
        e.compute_range(&job(5));
        e.start().unwrap();

        let posts = &e.group().posts;
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].0, 0);
        assert_eq!(posts[0].1.local_addr, 0x10_000);
        assert_eq!(posts[1].1.local_addr, 0x10_000 + 64);
        assert_eq!(posts[1].1.remote_addr, posts[1].1.local_addr);
        assert_eq!(e.outstanding(), 10 - 2);

        // Slot 0 moves on to chunk 2, not chunk 1.
        assert!(ack(&mut e, 0));
        assert_eq!(e.group().posts[2].1.local_addr, 0x10_000 + 2 * 64);
    }

    #[test]
    fn test_parity_toggles_once_per_chunk() {
        let (mut e, _) = engine(1, 0, 1);
        e.compute_range(&job(6));
        e.start().unwrap();
        let mut parities = vec![e.slot_tag(0).parity()];
        for _ in 0..5 {
            assert!(ack(&mut e, 0));
            parities.push(e.slot_tag(0).parity());
        }
        assert_eq!(parities, vec![0, 1, 0, 1, 0, 1]);
        let posted: Vec<_> = e.group().posts.iter().map(|(_, t)| t.tag.parity()).collect();
        assert_eq!(posted, parities);
    }

    #[test]
    fn test_stale_notifications_do_not_advance() {
        let (mut e, _) = engine(1, 0, 2);
        e.compute_range(&job(4));
        e.start().unwrap();
        let before = e.outstanding();
        let current = e.in_flight(1).unwrap().tag;

        let mut previous = current;
        previous.flip();
        let other_slot = e.in_flight(0).unwrap().tag;
        for tag in [Some(previous), Some(other_slot), None, Some(previous)] {
            assert!(!e.on_receive(1, tag).unwrap());
        }
        assert_eq!(e.outstanding(), before);
        assert_eq!(e.group().posts.len(), 2);
        assert_eq!(e.stats().stale_notifications, 4);
        assert_eq!(e.group().reposts, vec![1, 1, 1, 1]);

        assert!(e.on_receive(1, Some(current)).unwrap());
        assert_eq!(e.outstanding(), before - 2);
        assert_eq!(e.group().posts.len(), 3);
    }

    #[test]
    fn test_last_chunk_truncated_and_slot_goes_idle() {
        let (mut e, _) = engine(1, 0, 2);
        let mut j = job(2);
        j.len_bytes = 64 + 20;
        e.compute_range(&j);
        e.start().unwrap();
        assert_eq!(e.group().posts[1].1.length, 20);

        assert!(ack(&mut e, 0));
        assert!(e.in_flight(0).is_none());
        assert!(ack(&mut e, 1));
        assert_eq!(e.outstanding(), 0);

        // A late duplicate for a finished slot is stale.
        let tag = e.slot_tag(1);
        assert!(!e.on_receive(1, Some(tag)).unwrap());
    }

    #[test]
    fn test_zero_length_job_posts_one_empty_transfer() {
        let (mut e, _) = engine(2, 0, 2);
        let mut j = job(0);
        j.len_bytes = 0;
        e.compute_range(&j);
        assert_eq!(e.outstanding(), 2);
        e.start().unwrap();
        assert_eq!(e.group().posts.len(), 1);
        assert_eq!(e.group().posts[0].1.length, 0);

        let (mut idle, _) = engine(2, 1, 2);
        idle.compute_range(&j);
        assert_eq!(idle.outstanding(), 0);
        idle.start().unwrap();
        assert!(idle.group().posts.is_empty());
    }

    #[test]
    fn test_timeout_retransmits_exactly_once() {
        let (mut e, clock) = engine(1, 0, 2);
        e.compute_range(&job(4));
        e.start().unwrap();
        clock.set(1_000);
        e.on_send_ack(0);
        e.on_send_ack(1);
        // Slot 1 is acknowledged; slot 0's result never arrives.
        assert!(ack(&mut e, 1));
        let posts_before = e.group().posts.len();

        assert_eq!(e.check_timeouts(1_000 + 100_000).unwrap(), None);
        assert_eq!(e.check_timeouts(1_000 + 100_001).unwrap(), Some(0));
        assert_eq!(e.check_timeouts(1_000 + 500_000).unwrap(), None);

        let posts = &e.group().posts;
        assert_eq!(posts.len(), posts_before + 1);
        let (slot, resent) = posts[posts.len() - 1];
        assert_eq!(slot, 0);
        assert_eq!(resent, posts[0].1);
        assert_eq!(e.stats().retransmissions, 1);
    }

    #[test]
    fn test_send_ack_on_idle_slot_arms_no_timer() {
        let (mut e, clock) = engine(1, 0, 1);
        e.compute_range(&job(1));
        e.start().unwrap();
        assert!(ack(&mut e, 0));
        e.on_send_ack(0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(e.check_timeouts(clock.now_nanos()).unwrap(), None);
    }

    #[test]
    fn test_zero_timeout_disables_retransmission() {
        let mut cfg = config(1, 1);
        cfg.retransmit_timeout = Duration::ZERO;
        let mut e =
            WindowEngine::new(0, ScriptedGroup::new(1), &cfg, Arc::new(ManualClock::new())).unwrap();
        e.compute_range(&job(1));
        e.start().unwrap();
        e.on_send_ack(0);
        assert_eq!(e.check_timeouts(u64::MAX).unwrap(), None);
    }

    #[test]
    fn test_run_completes_with_scripted_acks() {
        let (mut e, _) = engine(2, 0, 2);
        let j = job(5);
        e.compute_range(&j);

        // Precompute every tag the worker will post for chunks 0, 1, 2.
        let mut tags = [e.slot_tag(0), e.slot_tag(1)];
        let mut script = VecDeque::new();
        for chunk in 0..3 {
            let slot = chunk % 2;
            tags[slot].flip();
            script.push_back(Notification::send_complete(slot));
            script.push_back(Notification::receive(slot, tags[slot]));
        }
        e.group.queue = script;

        e.run(&j).unwrap();
        assert_eq!(e.outstanding(), 0);
        assert_eq!(e.stats().chunks_acked, 3);
        assert_eq!(e.group().posts.len(), 3);
    }

    #[test]
    fn test_error_status_is_fatal() {
        let (mut e, _) = engine(1, 0, 1);
        e.compute_range(&job(1));
        e.start().unwrap();
        let err = e
            .handle(&Notification::failed(0, NotificationKind::SendComplete, "retry exceeded"))
            .unwrap_err();
        assert!(matches!(err, ReduceError::CompletionFailed { slot: 0, .. }));

        let err = e.handle(&Notification::send_complete(7)).unwrap_err();
        assert!(matches!(err, ReduceError::UnknownSlot { slot: 7, slots: 1 }));
    }

    #[test]
    fn test_post_failure_propagates() {
        let (mut e, _) = engine(1, 0, 1);
        e.group.fail_posts = true;
        e.compute_range(&job(1));
        assert!(matches!(e.start(), Err(ReduceError::ChannelPost { slot: 0, .. })));
    }

    #[test]
    fn test_tags_continue_across_jobs() {
        let (mut e, _) = engine(1, 0, 1);
        e.compute_range(&job(1));
        e.start().unwrap();
        assert_eq!(e.slot_tag(0).parity(), 0);
        assert!(ack(&mut e, 0));

        e.compute_range(&job(1));
        e.start().unwrap();
        assert_eq!(e.slot_tag(0).parity(), 1);
    }
}
