use crate::error::ReduceError;
use crate::types::WorkerId;

/// Policy for unrecoverable worker errors.
///
/// A failed transfer leaves the reduction with no defined partial result.
/// The default policy logs and terminates the process. A handler that
/// returns instead lets the worker rejoin the barrier and the pending
/// `all_reduce` call fail with [`ReduceError::JobFailed`].
pub trait FatalHandler: Send + Sync {
    fn on_fatal(&self, worker: WorkerId, reduction_id: u64, error: &ReduceError);
}

impl<F> FatalHandler for F
where
    F: Fn(WorkerId, u64, &ReduceError) + Send + Sync,
{
    fn on_fatal(&self, worker: WorkerId, reduction_id: u64, error: &ReduceError) {
        self(worker, reduction_id, error)
    }
}

/// Log the error and exit the process with status 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitOnFatal;

impl FatalHandler for ExitOnFatal {
    fn on_fatal(&self, worker: WorkerId, reduction_id: u64, error: &ReduceError) {
        tracing::error!(worker, reduction_id, %error, "fatal reduction error, exiting");
        std::process::exit(1);
    }
}

/// Log the error and let the reduction fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnFatal;

impl FatalHandler for LogOnFatal {
    fn on_fatal(&self, worker: WorkerId, reduction_id: u64, error: &ReduceError) {
        tracing::error!(worker, reduction_id, %error, "reduction failed");
    }
}
