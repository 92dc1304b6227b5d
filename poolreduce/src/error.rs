pub type Result<T> = std::result::Result<T, ReduceError>;

#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("posting transfer on slot {slot} failed: {reason}")]
    ChannelPost { slot: usize, reason: String },

    #[error("reposting receive on slot {slot} failed: {reason}")]
    ReceiveRepost { slot: usize, reason: String },

    #[error("polling notification queue failed: {reason}")]
    Poll { reason: String },

    #[error("completion on slot {slot} reported error: {status}")]
    CompletionFailed { slot: usize, status: String },

    #[error("notification for slot {slot} but group has {slots} slots")]
    UnknownSlot { slot: usize, slots: usize },

    #[error("channel group error: {message}")]
    ChannelGroup {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("spawning worker thread failed: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("worker {worker} panicked")]
    WorkerPanicked { worker: usize },

    #[error("reduction {reduction_id} failed on workers {failed_workers:?}")]
    JobFailed {
        reduction_id: u64,
        failed_workers: Vec<usize>,
    },

    #[error("reducer has been shut down")]
    ShutDown,
}

impl ReduceError {
    /// Create a `ChannelGroup` error with just a message.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::ChannelGroup {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `ChannelGroup` error with a message and a source error.
    pub fn channel_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ChannelGroup {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}
