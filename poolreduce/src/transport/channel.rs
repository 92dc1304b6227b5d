//! Contract between the window engine and a channel substrate.
//!
//! A substrate provides, per worker, a fixed group of duplex channels
//! (slots) sharing one notification queue. The engine owns its group
//! exclusively; nothing here is shared across worker threads.

use crate::error::Result;
use crate::protocol::SequenceTag;
use crate::types::{DataType, WorkerId};

/// One outbound data move, posted on a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Source address in the local registered region.
    pub local_addr: u64,
    /// Bytes to move. Zero for an empty job.
    pub length: usize,
    /// Destination address. Peers use symmetric layouts, so this is the
    /// same offset as the source.
    pub remote_addr: u64,
    pub tag: SequenceTag,
    /// Element type, for substrates that aggregate in flight.
    pub dtype: DataType,
}

/// Which stream a notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// A posted transfer has left the local channel.
    SendComplete,
    /// An inbound result landed and consumed one receive credit.
    Receive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Failed(String),
}

impl CompletionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CompletionStatus::Success)
    }
}

/// A completion event drained from a group's notification queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Slot (correlation id) the event belongs to.
    pub slot: usize,
    pub kind: NotificationKind,
    /// Tag echoed back by the remote side. Present on receives.
    pub tag: Option<SequenceTag>,
    pub status: CompletionStatus,
}

impl Notification {
    pub fn send_complete(slot: usize) -> Self {
        Self {
            slot,
            kind: NotificationKind::SendComplete,
            tag: None,
            status: CompletionStatus::Success,
        }
    }

    pub fn receive(slot: usize, tag: SequenceTag) -> Self {
        Self {
            slot,
            kind: NotificationKind::Receive,
            tag: Some(tag),
            status: CompletionStatus::Success,
        }
    }

    pub fn failed(slot: usize, kind: NotificationKind, status: impl Into<String>) -> Self {
        Self {
            slot,
            kind,
            tag: None,
            status: CompletionStatus::Failed(status.into()),
        }
    }
}

/// A worker's bounded set of channels bound to one notification queue.
pub trait ChannelGroup: Send {
    /// Number of slots in the group.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue `transfer` on `slot`'s channel.
    fn post_transfer(&mut self, slot: usize, transfer: &Transfer) -> Result<()>;

    /// Re-arm one notification-only receive on `slot`.
    fn repost_receive(&mut self, slot: usize) -> Result<()>;

    /// Non-blocking drain of at most `max` notifications into `out`.
    /// Returns how many were appended.
    fn poll(&mut self, out: &mut Vec<Notification>, max: usize) -> Result<usize>;
}

impl<G: ChannelGroup + ?Sized> ChannelGroup for Box<G> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn post_transfer(&mut self, slot: usize, transfer: &Transfer) -> Result<()> {
        (**self).post_transfer(slot, transfer)
    }

    fn repost_receive(&mut self, slot: usize) -> Result<()> {
        (**self).repost_receive(slot)
    }

    fn poll(&mut self, out: &mut Vec<Notification>, max: usize) -> Result<usize> {
        (**self).poll(out, max)
    }
}

/// Factory for per-worker channel groups.
///
/// Endpoint resolution with peers happens inside `create_group`; a returned
/// group is ready for traffic.
pub trait Fabric: Send + Sync {
    fn create_group(&self, worker: WorkerId, slots: usize) -> Result<Box<dyn ChannelGroup>>;
}
