use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use crate::client::fatal::{ExitOnFatal, FatalHandler};
use crate::client::worker::{Shared, Worker, build_engine};
use crate::config::ReduceConfig;
use crate::error::{ReduceError, Result};
use crate::protocol::{Clock, EngineStats, MonotonicClock};
use crate::transport::Fabric;
use crate::types::{DataType, Element, ReductionJob};

/// Aggregated counters across all workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReducerStats {
    /// `all_reduce` calls made, including failed ones.
    pub reductions: u64,
    pub retransmissions: u64,
    pub stale_notifications: u64,
    pub chunks_acked: u64,
}

/// Construction options beyond [`ReduceConfig`].
#[derive(Clone)]
pub struct ReducerOptions {
    pub fatal_handler: Arc<dyn FatalHandler>,
    pub clock: Arc<dyn Clock>,
}

impl Default for ReducerOptions {
    fn default() -> Self {
        Self {
            fatal_handler: Arc::new(ExitOnFatal),
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

/// In-place all-reduce over a pool of persistent worker threads.
///
/// Each worker owns one channel group and one window engine. A call to
/// [`all_reduce`](Self::all_reduce) publishes the job, releases the
/// workers through the barrier, and returns once every worker has
/// rejoined it with its share of chunks acknowledged.
pub struct Reducer {
    config: ReduceConfig,
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    reductions: u64,
    shut_down: bool,
}

impl Reducer {
    /// Spawn workers with the default fatal policy (log and exit).
    pub fn new(config: ReduceConfig, fabric: &dyn Fabric) -> Result<Self> {
        Self::with_options(config, fabric, ReducerOptions::default())
    }

    pub fn with_fatal_handler(
        config: ReduceConfig,
        fabric: &dyn Fabric,
        handler: Arc<dyn FatalHandler>,
    ) -> Result<Self> {
        Self::with_options(
            config,
            fabric,
            ReducerOptions {
                fatal_handler: handler,
                ..ReducerOptions::default()
            },
        )
    }

    pub fn with_options(
        config: ReduceConfig,
        fabric: &dyn Fabric,
        options: ReducerOptions,
    ) -> Result<Self> {
        Self::start(config, fabric, options, spawn_worker)
    }

    fn start<S>(
        config: ReduceConfig,
        fabric: &dyn Fabric,
        options: ReducerOptions,
        mut spawn: S,
    ) -> Result<Self>
    where
        S: FnMut(String, Worker) -> io::Result<JoinHandle<()>>,
    {
        config.validate()?;

        // Every group is created before any thread starts, so a substrate
        // failure leaves nothing to clean up.
        let mut engines = Vec::with_capacity(config.num_workers);
        for worker in 0..config.num_workers {
            let group = fabric.create_group(worker, config.slots_per_worker)?;
            engines.push(build_engine(
                worker,
                group,
                &config,
                Arc::clone(&options.clock),
            )?);
        }

        let shared = Arc::new(Shared::new(config.num_workers));
        let mut reducer = Self {
            config,
            shared: Arc::clone(&shared),
            handles: Vec::with_capacity(engines.len()),
            reductions: 0,
            shut_down: false,
        };

        for engine in engines {
            let worker = Worker {
                engine,
                shared: Arc::clone(&shared),
                fatal: Arc::clone(&options.fatal_handler),
            };
            let name = format!("poolreduce-worker-{}", reducer.handles.len());
            match spawn(name, worker) {
                Ok(handle) => reducer.handles.push(handle),
                Err(e) => {
                    tracing::error!(
                        started = reducer.handles.len(),
                        error = %e,
                        "worker spawn failed"
                    );
                    reducer.abort_started();
                    return Err(ReduceError::ThreadSpawn(e));
                }
            }
        }

        tracing::info!(
            workers = reducer.config.num_workers,
            slots_per_worker = reducer.config.slots_per_worker,
            message_size = reducer.config.message_size,
            "reducer started"
        );
        Ok(reducer)
    }

    pub fn config(&self) -> &ReduceConfig {
        &self.config
    }

    /// Sum `buf` element-wise across all participants, in place.
    pub fn all_reduce<T: Element>(&mut self, buf: &mut [T]) -> Result<()> {
        // SAFETY: `buf` is exclusively borrowed for the whole blocking call.
        unsafe { self.all_reduce_raw(buf.as_mut_ptr() as u64, buf.len(), T::DTYPE) }
    }

    /// Raw-pointer variant of [`all_reduce`](Self::all_reduce).
    ///
    /// # Safety
    /// `ptr` must point to `count` initialized elements of `dtype`, valid
    /// for reads and writes and not accessed by anything else until this
    /// call returns.
    pub unsafe fn all_reduce_raw(
        &mut self,
        ptr: u64,
        count: usize,
        dtype: DataType,
    ) -> Result<()> {
        if self.shut_down {
            return Err(ReduceError::ShutDown);
        }
        let len_bytes = count.checked_mul(dtype.size_in_bytes()).ok_or_else(|| {
            ReduceError::invalid_config("count", format!("{count} {dtype} elements overflow"))
        })?;

        let job = ReductionJob {
            addr: ptr,
            len_bytes,
            dtype,
            reduction_id: self.reductions + 1,
        };
        for report in &self.shared.reports {
            report.failed.store(false, Ordering::Relaxed);
        }
        self.shared.job.publish(&job);

        tracing::debug!(reduction_id = job.reduction_id, len_bytes, %dtype, "all_reduce start");
        self.shared.barrier.wait()?;
        self.shared.barrier.wait()?;
        self.reductions = job.reduction_id;

        let failed_workers: Vec<usize> = self
            .shared
            .reports
            .iter()
            .enumerate()
            .filter(|(_, r)| r.failed.load(Ordering::Relaxed))
            .map(|(w, _)| w)
            .collect();
        if !failed_workers.is_empty() {
            return Err(ReduceError::JobFailed {
                reduction_id: job.reduction_id,
                failed_workers,
            });
        }
        tracing::debug!(reduction_id = job.reduction_id, "all_reduce done");
        Ok(())
    }

    /// Counters summed over all workers.
    pub fn stats(&self) -> ReducerStats {
        let mut total = EngineStats::default();
        for stats in self.worker_stats() {
            total.merge(&stats);
        }
        ReducerStats {
            reductions: self.reductions,
            retransmissions: total.retransmissions,
            stale_notifications: total.stale_notifications,
            chunks_acked: total.chunks_acked,
        }
    }

    /// Engine counters of each worker, by worker id.
    pub fn worker_stats(&self) -> Vec<EngineStats> {
        self.shared
            .reports
            .iter()
            .map(|r| r.stats.lock().map(|s| *s).unwrap_or_default())
            .collect()
    }

    /// Release workers parked on the start barrier and join them.
    fn abort_started(&mut self) {
        self.shut_down = true;
        self.shared.job.request_shutdown();
        self.shared.barrier.abort();
        for (worker, handle) in self.handles.drain(..).enumerate() {
            if handle.join().is_err() {
                tracing::warn!(worker, "worker panicked during abort");
            }
        }
    }

    /// Stop and join every worker.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.shared.job.request_shutdown();
        self.shared.barrier.wait()?;

        let mut result = Ok(());
        for (worker, handle) in self.handles.drain(..).enumerate() {
            if handle.join().is_err() && result.is_ok() {
                result = Err(ReduceError::WorkerPanicked { worker });
            }
        }
        tracing::info!(reductions = self.reductions, "reducer shut down");
        result
    }
}

fn spawn_worker(name: String, worker: Worker) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || worker.run())
}

impl Drop for Reducer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_inner() {
            tracing::warn!(error = %e, "reducer shutdown on drop failed");
        }
    }
}
