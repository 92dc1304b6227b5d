use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};

use crate::error::{ReduceError, Result};
use crate::types::{DataType, ReductionJob};

/// Job descriptor written by the orchestrator and read by workers.
///
/// Fields are written only before the start barrier and read only after
/// it, so the barrier's mutex orders every access and `Relaxed` suffices.
#[derive(Debug, Default)]
pub(crate) struct JobBoard {
    addr: AtomicU64,
    len_bytes: AtomicUsize,
    dtype: AtomicU8,
    reduction_id: AtomicU64,
    shutdown: AtomicBool,
}

impl JobBoard {
    pub fn publish(&self, job: &ReductionJob) {
        self.addr.store(job.addr, Ordering::Relaxed);
        self.len_bytes.store(job.len_bytes, Ordering::Relaxed);
        self.dtype.store(job.dtype as u8, Ordering::Relaxed);
        self.reduction_id.store(job.reduction_id, Ordering::Relaxed);
    }

    pub fn read(&self) -> Result<ReductionJob> {
        let raw = self.dtype.load(Ordering::Relaxed);
        let dtype = match raw {
            0 => DataType::F32,
            1 => DataType::I32,
            other => {
                return Err(ReduceError::invalid_config(
                    "dtype",
                    format!("unknown data type tag {other}"),
                ));
            }
        };
        Ok(ReductionJob {
            addr: self.addr.load(Ordering::Relaxed),
            len_bytes: self.len_bytes.load(Ordering::Relaxed),
            dtype,
            reduction_id: self.reduction_id.load(Ordering::Relaxed),
        })
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
