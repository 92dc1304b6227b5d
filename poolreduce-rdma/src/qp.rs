//! Queue pairs: one per slot, driven INIT -> RTR -> RTS against a remote
//! endpoint resolved at rendezvous.

use std::os::raw::c_int;
use std::ptr;
use std::sync::Arc;

use ibverbs_sys::{ibv_access_flags, ibv_qp_attr_mask, ibv_qp_state, ibv_send_flags, ibv_wr_opcode};

use crate::context::{CompletionQueue, RdmaContext};
use crate::endpoint::RdmaEndpoint;
use crate::error::{RdmaError, Result};

/// Queue pair transport service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QpKind {
    /// Unreliable connected. Loss is left to the window engine.
    #[default]
    Uc,
    /// Reliable connected.
    Rc,
}

/// Send/receive queue depths and path parameters for each queue pair.
#[derive(Debug, Clone, Copy)]
pub struct QpOptions {
    pub kind: QpKind,
    pub max_send_wr: u32,
    pub max_recv_wr: u32,
}

impl Default for QpOptions {
    fn default() -> Self {
        Self {
            kind: QpKind::Uc,
            max_send_wr: 4,
            max_recv_wr: 4,
        }
    }
}

/// One RDMA write with immediate. Completion is reported under `wr_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteImm {
    pub wr_id: u64,
    pub local_addr: u64,
    pub length: u32,
    pub lkey: u32,
    pub remote_addr: u64,
    pub rkey: u32,
    /// Host order; sent big-endian.
    pub imm: u32,
}

pub(crate) struct QueuePair {
    qp: *mut ibverbs_sys::ibv_qp,
    psn: u32,
    _ctx: Arc<RdmaContext>,
}

unsafe impl Send for QueuePair {}

/// Path MTU carrying exactly one `packet_size`-byte packet per frame.
///
/// Sequence tags count pool slots in packets, so the wire MTU must equal
/// the configured packet size.
pub fn path_mtu(packet_size: usize) -> Result<ibverbs_sys::ibv_mtu> {
    Ok(match packet_size {
        256 => ibverbs_sys::IBV_MTU_256,
        512 => ibverbs_sys::IBV_MTU_512,
        1024 => ibverbs_sys::IBV_MTU_1024,
        2048 => ibverbs_sys::IBV_MTU_2048,
        4096 => ibverbs_sys::IBV_MTU_4096,
        other => return Err(RdmaError::PacketSize(other)),
    })
}

/// Pack slot and direction into a work request id.
pub(crate) fn wr_id(slot: usize, receive: bool) -> u64 {
    ((slot as u64) << 1) | receive as u64
}

pub(crate) fn split_wr_id(wr_id: u64) -> (usize, bool) {
    ((wr_id >> 1) as usize, wr_id & 1 == 1)
}

impl QueuePair {
    /// Create a queue pair on `cq` and move it to INIT.
    pub(crate) fn create(
        ctx: &Arc<RdmaContext>,
        cq: &CompletionQueue,
        options: &QpOptions,
    ) -> Result<Self> {
        unsafe {
            let mut init: ibverbs_sys::ibv_qp_init_attr = std::mem::zeroed();
            init.qp_type = match options.kind {
                QpKind::Uc => ibverbs_sys::ibv_qp_type::IBV_QPT_UC,
                QpKind::Rc => ibverbs_sys::ibv_qp_type::IBV_QPT_RC,
            };
            init.send_cq = cq.cq;
            init.recv_cq = cq.cq;
            init.cap.max_send_wr = options.max_send_wr;
            init.cap.max_recv_wr = options.max_recv_wr;
            init.cap.max_send_sge = 1;
            init.cap.max_recv_sge = 1;

            let qp = ibverbs_sys::ibv_create_qp(ctx.pd, &mut init);
            if qp.is_null() {
                return Err(RdmaError::device("ibv_create_qp failed"));
            }
            // Dropping `this` on any later error destroys the QP.
            let this = Self {
                qp,
                psn: (*qp).qp_num & 0x00ff_ffff,
                _ctx: Arc::clone(ctx),
            };

            let mut attr: ibverbs_sys::ibv_qp_attr = std::mem::zeroed();
            attr.qp_state = ibv_qp_state::IBV_QPS_INIT;
            attr.pkey_index = 0;
            attr.port_num = ctx.port_num;
            attr.qp_access_flags = (ibv_access_flags::IBV_ACCESS_LOCAL_WRITE
                | ibv_access_flags::IBV_ACCESS_REMOTE_WRITE)
                .0;
            let mask = ibv_qp_attr_mask::IBV_QP_STATE
                | ibv_qp_attr_mask::IBV_QP_PKEY_INDEX
                | ibv_qp_attr_mask::IBV_QP_PORT
                | ibv_qp_attr_mask::IBV_QP_ACCESS_FLAGS;
            this.modify(&mut attr, mask.0 as c_int, "ibv_modify_qp(INIT)")?;
            Ok(this)
        }
    }

    pub(crate) fn qp_num(&self) -> u32 {
        unsafe { (*self.qp).qp_num }
    }

    pub(crate) fn psn(&self) -> u32 {
        self.psn
    }

    fn modify(
        &self,
        attr: &mut ibverbs_sys::ibv_qp_attr,
        mask: c_int,
        call: &'static str,
    ) -> Result<()> {
        let rc = unsafe { ibverbs_sys::ibv_modify_qp(self.qp, attr, mask) };
        if rc != 0 {
            return Err(RdmaError::Verbs { call, rc });
        }
        Ok(())
    }

    /// Bring the queue pair up against `remote`: INIT -> RTR -> RTS.
    pub(crate) fn connect(
        &mut self,
        ctx: &RdmaContext,
        remote: &RdmaEndpoint,
        kind: QpKind,
        mtu: ibverbs_sys::ibv_mtu,
    ) -> Result<()> {
        unsafe {
            let mut attr: ibverbs_sys::ibv_qp_attr = std::mem::zeroed();
            attr.qp_state = ibv_qp_state::IBV_QPS_RTR;
            attr.path_mtu = mtu;
            attr.dest_qp_num = remote.qp_num;
            attr.rq_psn = remote.psn;
            attr.ah_attr.is_global = 1;
            attr.ah_attr.grh.dgid.raw = remote.gid;
            attr.ah_attr.grh.sgid_index = ctx.gid_index;
            attr.ah_attr.grh.hop_limit = 64;
            attr.ah_attr.dlid = remote.lid;
            attr.ah_attr.port_num = ctx.port_num;

            let mut mask = ibv_qp_attr_mask::IBV_QP_STATE
                | ibv_qp_attr_mask::IBV_QP_AV
                | ibv_qp_attr_mask::IBV_QP_PATH_MTU
                | ibv_qp_attr_mask::IBV_QP_DEST_QPN
                | ibv_qp_attr_mask::IBV_QP_RQ_PSN;
            if kind == QpKind::Rc {
                attr.max_dest_rd_atomic = 1;
                attr.min_rnr_timer = 12;
                mask = mask
                    | ibv_qp_attr_mask::IBV_QP_MAX_DEST_RD_ATOMIC
                    | ibv_qp_attr_mask::IBV_QP_MIN_RNR_TIMER;
            }
            self.modify(&mut attr, mask.0 as c_int, "ibv_modify_qp(RTR)")?;

            let mut attr: ibverbs_sys::ibv_qp_attr = std::mem::zeroed();
            attr.qp_state = ibv_qp_state::IBV_QPS_RTS;
            attr.sq_psn = self.psn;
            let mut mask = ibv_qp_attr_mask::IBV_QP_STATE | ibv_qp_attr_mask::IBV_QP_SQ_PSN;
            if kind == QpKind::Rc {
                attr.timeout = 14;
                attr.retry_cnt = 7;
                attr.rnr_retry = 7;
                attr.max_rd_atomic = 1;
                mask = mask
                    | ibv_qp_attr_mask::IBV_QP_TIMEOUT
                    | ibv_qp_attr_mask::IBV_QP_RETRY_CNT
                    | ibv_qp_attr_mask::IBV_QP_RNR_RETRY
                    | ibv_qp_attr_mask::IBV_QP_MAX_QP_RD_ATOMIC;
            }
            self.modify(&mut attr, mask.0 as c_int, "ibv_modify_qp(RTS)")
        }
    }

    /// Post a signaled RDMA write with immediate.
    pub(crate) fn post_write_imm(&mut self, req: &WriteImm) -> Result<()> {
        unsafe {
            let mut sge: ibverbs_sys::ibv_sge = std::mem::zeroed();
            sge.addr = req.local_addr;
            sge.length = req.length;
            sge.lkey = req.lkey;

            let mut wr: ibverbs_sys::ibv_send_wr = std::mem::zeroed();
            wr.wr_id = req.wr_id;
            wr.sg_list = &mut sge;
            wr.num_sge = 1;
            wr.opcode = ibv_wr_opcode::IBV_WR_RDMA_WRITE_WITH_IMM;
            wr.send_flags = ibv_send_flags::IBV_SEND_SIGNALED.0;
            wr.__bindgen_anon_1.imm_data = req.imm.to_be();
            wr.wr.rdma.remote_addr = req.remote_addr;
            wr.wr.rdma.rkey = req.rkey;

            let mut bad_wr: *mut ibverbs_sys::ibv_send_wr = ptr::null_mut();
            let ctx = (*self.qp).context;
            let post_send = (*ctx)
                .ops
                .post_send
                .as_mut()
                .ok_or_else(|| RdmaError::device("post_send missing from context ops"))?;
            let rc = post_send(self.qp, &mut wr, &mut bad_wr);
            if rc != 0 {
                return Err(RdmaError::Verbs {
                    call: "ibv_post_send",
                    rc,
                });
            }
        }
        Ok(())
    }

    /// Post a receive with no scatter list. It only consumes the immediate.
    pub(crate) fn post_recv(&mut self, wr_id: u64) -> Result<()> {
        unsafe {
            let mut wr: ibverbs_sys::ibv_recv_wr = std::mem::zeroed();
            wr.wr_id = wr_id;
            wr.sg_list = ptr::null_mut();
            wr.num_sge = 0;

            let mut bad_wr: *mut ibverbs_sys::ibv_recv_wr = ptr::null_mut();
            let ctx = (*self.qp).context;
            let post_recv = (*ctx)
                .ops
                .post_recv
                .as_mut()
                .ok_or_else(|| RdmaError::device("post_recv missing from context ops"))?;
            let rc = post_recv(self.qp, &mut wr, &mut bad_wr);
            if rc != 0 {
                return Err(RdmaError::Verbs {
                    call: "ibv_post_recv",
                    rc,
                });
            }
        }
        Ok(())
    }
}

impl Drop for QueuePair {
    fn drop(&mut self) {
        unsafe {
            if !self.qp.is_null() {
                ibverbs_sys::ibv_destroy_qp(self.qp);
            }
        }
    }
}
