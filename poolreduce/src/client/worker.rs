use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::client::barrier::SenseBarrier;
use crate::client::fatal::FatalHandler;
use crate::client::job::JobBoard;
use crate::config::ReduceConfig;
use crate::error::{ReduceError, Result};
use crate::protocol::{Clock, EngineStats, WindowEngine};
use crate::transport::ChannelGroup;
use crate::types::WorkerId;

/// Per-worker outcome of the most recent job.
#[derive(Debug, Default)]
pub(crate) struct WorkerReport {
    pub failed: AtomicBool,
    pub stats: Mutex<EngineStats>,
}

/// State shared between the orchestrator and its workers.
pub(crate) struct Shared {
    pub barrier: SenseBarrier,
    pub job: JobBoard,
    pub reports: Vec<WorkerReport>,
}

impl Shared {
    pub fn new(workers: usize) -> Self {
        Self {
            barrier: SenseBarrier::new(workers + 1),
            job: JobBoard::default(),
            reports: (0..workers).map(|_| WorkerReport::default()).collect(),
        }
    }
}

/// A persistent worker: one engine, woken once per job by the barrier.
pub(crate) struct Worker {
    pub engine: WindowEngine<Box<dyn ChannelGroup>>,
    pub shared: Arc<Shared>,
    pub fatal: Arc<dyn FatalHandler>,
}

impl Worker {
    fn id(&self) -> WorkerId {
        self.engine.worker()
    }

    /// Thread body. Returns when shutdown is requested or the barrier is
    /// aborted.
    pub fn run(mut self) {
        let worker = self.id();
        tracing::info!(worker, "worker started");

        loop {
            if !self.cross_barrier() {
                return;
            }
            if self.shared.job.is_shutdown() {
                break;
            }

            if let Err((reduction_id, e)) = self.run_job() {
                self.shared.reports[worker].failed.store(true, Ordering::Relaxed);
                self.fatal.on_fatal(worker, reduction_id, &e);
            }

            if !self.cross_barrier() {
                return;
            }
        }

        tracing::info!(worker, "worker stopped");
    }

    /// Wait on the shared barrier. `false` means the worker must exit.
    fn cross_barrier(&self) -> bool {
        let worker = self.id();
        match self.shared.barrier.wait() {
            Ok(_) => true,
            Err(ReduceError::ShutDown) => {
                tracing::info!(worker, "worker released by barrier abort");
                false
            }
            Err(e) => {
                self.fatal.on_fatal(worker, 0, &e);
                false
            }
        }
    }

    fn run_job(&mut self) -> std::result::Result<(), (u64, ReduceError)> {
        let worker = self.id();
        let job = self.shared.job.read().map_err(|e| (0, e))?;

        let outcome = catch_unwind(AssertUnwindSafe(|| self.engine.run(&job)));
        if let Ok(mut stats) = self.shared.reports[worker].stats.lock() {
            *stats = self.engine.stats();
        }

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err((job.reduction_id, e)),
            Err(_) => Err((job.reduction_id, ReduceError::WorkerPanicked { worker })),
        }
    }
}

/// Bind a worker's engine to its group and arm one receive per slot.
pub(crate) fn build_engine(
    worker: WorkerId,
    group: Box<dyn ChannelGroup>,
    config: &ReduceConfig,
    clock: Arc<dyn Clock>,
) -> Result<WindowEngine<Box<dyn ChannelGroup>>> {
    let mut engine = WindowEngine::new(worker, group, config, clock)?;
    engine.arm_receives()?;
    Ok(engine)
}
