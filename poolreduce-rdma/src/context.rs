//! Device-wide verbs resources: device handle, protection domain, port info.

use std::os::raw::c_int;
use std::ptr;
use std::sync::Arc;

use ibverbs_sys::ibv_access_flags;

use crate::error::{RdmaError, Result};
use crate::mr::{RdmaRegion, alloc_buffer, free_buffer};

/// An opened RDMA device with one protection domain.
///
/// Completion queues, queue pairs and the registered region each hold an
/// `Arc` to the context, so the device outlives everything created on it.
pub struct RdmaContext {
    pub(crate) ctx: *mut ibverbs_sys::ibv_context,
    pub(crate) pd: *mut ibverbs_sys::ibv_pd,
    pub(crate) port_num: u8,
    pub(crate) gid_index: u8,
    gid: [u8; 16],
}

unsafe impl Send for RdmaContext {}
unsafe impl Sync for RdmaContext {}

impl RdmaContext {
    /// Open device `device_index` (first device when `None`) and query the
    /// GID used for addressing on `port_num`.
    pub fn open(device_index: Option<usize>, port_num: u8, gid_index: u8) -> Result<Arc<Self>> {
        unsafe {
            let mut num_devices: c_int = 0;
            let dev_list = ibverbs_sys::ibv_get_device_list(&mut num_devices);
            if dev_list.is_null() {
                return Err(RdmaError::device("ibv_get_device_list failed"));
            }
            if num_devices == 0 {
                ibverbs_sys::ibv_free_device_list(dev_list);
                return Err(RdmaError::device("no devices found"));
            }

            let idx = device_index.unwrap_or(0);
            if idx >= num_devices as usize {
                ibverbs_sys::ibv_free_device_list(dev_list);
                return Err(RdmaError::device(format!(
                    "device index {idx} out of range (have {num_devices})"
                )));
            }

            let dev = *dev_list.add(idx);
            let ctx = ibverbs_sys::ibv_open_device(dev);
            ibverbs_sys::ibv_free_device_list(dev_list);
            if ctx.is_null() {
                return Err(RdmaError::device("ibv_open_device failed"));
            }

            let pd = ibverbs_sys::ibv_alloc_pd(ctx);
            if pd.is_null() {
                ibverbs_sys::ibv_close_device(ctx);
                return Err(RdmaError::device("ibv_alloc_pd failed"));
            }

            // RoCE routes on the GID; the LID stays 0.
            let mut gid: ibverbs_sys::ibv_gid = std::mem::zeroed();
            let rc = ibverbs_sys::ibv_query_gid(ctx, port_num, gid_index as c_int, &mut gid);
            if rc != 0 {
                ibverbs_sys::ibv_dealloc_pd(pd);
                ibverbs_sys::ibv_close_device(ctx);
                return Err(RdmaError::Verbs {
                    call: "ibv_query_gid",
                    rc,
                });
            }

            tracing::info!(device = idx, port_num, gid_index, "RDMA device opened");
            Ok(Arc::new(Self {
                ctx,
                pd,
                port_num,
                gid_index,
                gid: gid.raw,
            }))
        }
    }

    pub fn gid(&self) -> [u8; 16] {
        self.gid
    }

    /// Allocate and register a zeroed region of `len` bytes for local and
    /// remote writes.
    pub fn register(self: &Arc<Self>, len: usize) -> Result<RdmaRegion> {
        let (ptr, alloc) = alloc_buffer(len)?;
        let access = ibv_access_flags::IBV_ACCESS_LOCAL_WRITE
            | ibv_access_flags::IBV_ACCESS_REMOTE_WRITE;
        let mr = unsafe { ibverbs_sys::ibv_reg_mr(self.pd, ptr as *mut _, alloc, access.0 as c_int) };
        if mr.is_null() {
            unsafe { free_buffer(ptr, alloc) };
            return Err(RdmaError::device(format!("ibv_reg_mr failed for {len} bytes")));
        }
        Ok(RdmaRegion::new(mr, ptr, alloc, len, Arc::clone(self)))
    }

    /// Create a completion queue with room for `depth` entries.
    pub(crate) fn create_cq(self: &Arc<Self>, depth: usize) -> Result<CompletionQueue> {
        let depth = c_int::try_from(depth)
            .map_err(|_| RdmaError::device(format!("CQ depth {depth} too large")))?;
        let cq = unsafe {
            ibverbs_sys::ibv_create_cq(self.ctx, depth, ptr::null_mut(), ptr::null_mut(), 0)
        };
        if cq.is_null() {
            return Err(RdmaError::device("ibv_create_cq failed"));
        }
        Ok(CompletionQueue {
            cq,
            _ctx: Arc::clone(self),
        })
    }
}

impl Drop for RdmaContext {
    fn drop(&mut self) {
        unsafe {
            if !self.pd.is_null() {
                ibverbs_sys::ibv_dealloc_pd(self.pd);
            }
            if !self.ctx.is_null() {
                ibverbs_sys::ibv_close_device(self.ctx);
            }
        }
    }
}

/// One worker group's completion queue, shared by all its queue pairs.
pub(crate) struct CompletionQueue {
    pub(crate) cq: *mut ibverbs_sys::ibv_cq,
    _ctx: Arc<RdmaContext>,
}

unsafe impl Send for CompletionQueue {}

impl CompletionQueue {
    /// Drain up to `wc.len()` work completions without blocking.
    pub(crate) fn poll(&mut self, wc: &mut [ibverbs_sys::ibv_wc]) -> Result<usize> {
        let max = c_int::try_from(wc.len()).unwrap_or(c_int::MAX);
        let n = unsafe {
            let ctx = (*self.cq).context;
            let poll_cq = (*ctx)
                .ops
                .poll_cq
                .as_mut()
                .ok_or_else(|| RdmaError::device("poll_cq missing from context ops"))?;
            poll_cq(self.cq, max, wc.as_mut_ptr())
        };
        if n < 0 {
            return Err(RdmaError::Verbs {
                call: "ibv_poll_cq",
                rc: n,
            });
        }
        Ok(n as usize)
    }
}

impl Drop for CompletionQueue {
    fn drop(&mut self) {
        unsafe {
            if !self.cq.is_null() {
                ibverbs_sys::ibv_destroy_cq(self.cq);
            }
        }
    }
}
