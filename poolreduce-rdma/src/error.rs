use poolreduce::{ReduceError, WorkerId};

pub type Result<T> = std::result::Result<T, RdmaError>;

#[derive(Debug, thiserror::Error)]
pub enum RdmaError {
    #[error("RDMA device error: {0}")]
    Device(String),

    #[error("{call} failed (rc={rc})")]
    Verbs { call: &'static str, rc: i32 },

    #[error("endpoint decode failed: {reason}")]
    Endpoint { reason: String },

    #[error("rendezvous for worker {worker} failed: {reason}")]
    Rendezvous { worker: WorkerId, reason: String },

    #[error("packet size {0} is not a path MTU (256, 512, 1024, 2048 or 4096)")]
    PacketSize(usize),

    #[error("address range {addr:#x}+{len} outside registered region")]
    OutsideRegion { addr: u64, len: usize },

    #[error("poolreduce error: {0}")]
    Reduce(#[from] ReduceError),
}

impl RdmaError {
    pub(crate) fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }
}

/// Surface verbs failures through the core channel error, keeping the
/// RDMA error as its source.
impl From<RdmaError> for ReduceError {
    fn from(e: RdmaError) -> Self {
        match e {
            RdmaError::Reduce(inner) => inner,
            other => ReduceError::channel_with_source("RDMA", other),
        }
    }
}
