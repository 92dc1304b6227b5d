use std::sync::Arc;

use poolreduce::{
    ChannelGroup, Notification, NotificationKind, ReduceError, Result, SequenceTag, Transfer,
    WorkerId,
};

use crate::context::{CompletionQueue, RdmaContext};
use crate::endpoint::RdmaEndpoint;
use crate::mr::RdmaRegion;
use crate::qp::{QueuePair, WriteImm, split_wr_id, wr_id};

/// How the remote key and address of a write are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Addressing {
    /// The aggregating switch terminates the write. It reads the sequence
    /// tag from the rkey and the address is left symmetric.
    #[default]
    Switch,
    /// Write straight into the peer's registered region at the same offset.
    Peer,
}

/// Resolve the remote address and key for `transfer`.
pub(crate) fn remote_target(
    addressing: Addressing,
    transfer: &Transfer,
    local_base: u64,
    remote: &RdmaEndpoint,
) -> (u64, u32) {
    match addressing {
        Addressing::Switch => (transfer.remote_addr, transfer.tag.raw()),
        Addressing::Peer => (
            remote.addr + (transfer.remote_addr - local_base),
            remote.rkey,
        ),
    }
}

/// Turn one work completion into an engine notification.
pub(crate) fn to_notification(
    wr_id: u64,
    failure: Option<String>,
    imm: Option<u32>,
) -> Notification {
    let (slot, receive) = split_wr_id(wr_id);
    let kind = if receive {
        NotificationKind::Receive
    } else {
        NotificationKind::SendComplete
    };
    match (failure, receive, imm) {
        (Some(status), _, _) => Notification::failed(slot, kind, status),
        (None, false, _) => Notification::send_complete(slot),
        (None, true, Some(imm)) => Notification::receive(slot, SequenceTag::from_raw(imm)),
        (None, true, None) => Notification::failed(slot, kind, "receive without immediate"),
    }
}

/// One worker's slots: a queue pair each, one shared completion queue.
pub struct RdmaChannelGroup {
    worker: WorkerId,
    // Queue pairs are destroyed before the completion queue they post to.
    qps: Vec<QueuePair>,
    remotes: Vec<RdmaEndpoint>,
    cq: CompletionQueue,
    region: Arc<RdmaRegion>,
    addressing: Addressing,
    wc: Vec<ibverbs_sys::ibv_wc>,
    _ctx: Arc<RdmaContext>,
}

impl RdmaChannelGroup {
    pub(crate) fn new(
        worker: WorkerId,
        qps: Vec<QueuePair>,
        remotes: Vec<RdmaEndpoint>,
        cq: CompletionQueue,
        region: Arc<RdmaRegion>,
        addressing: Addressing,
        ctx: Arc<RdmaContext>,
    ) -> Self {
        Self {
            worker,
            qps,
            remotes,
            cq,
            region,
            addressing,
            wc: Vec::new(),
            _ctx: ctx,
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }
}

impl ChannelGroup for RdmaChannelGroup {
    fn len(&self) -> usize {
        self.qps.len()
    }

    fn post_transfer(&mut self, slot: usize, transfer: &Transfer) -> Result<()> {
        let post_err = |reason: String| ReduceError::ChannelPost { slot, reason };
        let Some(remote) = self.remotes.get(slot) else {
            return Err(post_err(format!("group has {} slots", self.qps.len())));
        };
        if !self.region.contains(transfer.local_addr, transfer.length)
            || !self.region.contains(transfer.remote_addr, transfer.length)
        {
            return Err(post_err(format!(
                "{:#x}+{} outside registered region",
                transfer.local_addr, transfer.length
            )));
        }
        let length = u32::try_from(transfer.length)
            .map_err(|_| post_err(format!("length {} exceeds u32", transfer.length)))?;

        let (remote_addr, rkey) =
            remote_target(self.addressing, transfer, self.region.addr(), remote);
        let req = WriteImm {
            wr_id: wr_id(slot, false),
            local_addr: transfer.local_addr,
            length,
            lkey: self.region.lkey(),
            remote_addr,
            rkey,
            imm: transfer.tag.raw(),
        };
        self.qps[slot]
            .post_write_imm(&req)
            .map_err(|e| post_err(e.to_string()))
    }

    fn repost_receive(&mut self, slot: usize) -> Result<()> {
        let slots = self.qps.len();
        let qp = self.qps.get_mut(slot).ok_or(ReduceError::UnknownSlot { slot, slots })?;
        qp.post_recv(wr_id(slot, true))
            .map_err(|e| ReduceError::ReceiveRepost {
                slot,
                reason: e.to_string(),
            })
    }

    fn poll(&mut self, out: &mut Vec<Notification>, max: usize) -> Result<usize> {
        self.wc.clear();
        self.wc.resize(max, ibverbs_sys::ibv_wc::default());
        let n = self.cq.poll(&mut self.wc).map_err(|e| ReduceError::Poll {
            reason: e.to_string(),
        })?;
        for wc in &self.wc[..n] {
            let failure = wc
                .error()
                .map(|(status, vendor_err)| format!("status={status:?} vendor_err={vendor_err}"));
            let imm = wc.imm_data().map(u32::from_be);
            out.push(to_notification(wc.wr_id(), failure, imm));
        }
        Ok(n)
    }
}
