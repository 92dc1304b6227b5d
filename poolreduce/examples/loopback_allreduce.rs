//! All-reduce across 4 participants through the in-process loopback switch.
//!
//! Each participant runs its own `Reducer` (worker pool, channel groups,
//! window engines), does a few warmup reductions, then times a series of
//! reductions, checking every result. Set `RUST_LOG=poolreduce=debug` to
//! watch ranges and retransmissions, and `POOLREDUCE_*` variables to change
//! the config.
//!
//! ```bash
//! RUST_LOG=info POOLREDUCE_WORKERS=2 POOLREDUCE_SLOTS_PER_WORKER=4 \
//!     cargo run --release --example loopback_allreduce
//! ```

use std::time::{Duration, Instant};

use poolreduce::{LoopbackSwitch, LossModel, Rank, ReduceConfig, ReduceError, Reducer};
use tracing_subscriber::EnvFilter;

const WORLD_SIZE: usize = 4;
const COUNT: usize = 1 << 16;
const WARMUP: usize = 5;
const ITERS: usize = 20;

/// Refill `data` with rank `rank`'s input for iteration `iter`.
fn fill(data: &mut [f32], rank: Rank, iter: usize) {
    let v = (rank as usize + 1 + iter % 8) as f32;
    data.iter_mut().for_each(|x| *x = v);
}

/// Sum of [`fill`] values over all ranks.
fn expected(iter: usize) -> f32 {
    (0..WORLD_SIZE).map(|r| (r + 1 + iter % 8) as f32).sum()
}

fn main() -> poolreduce::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_thread_names(true)
        .init();

    let config = ReduceConfig::from_env();
    // Light loss so the retransmission path shows up in the stats.
    let switch = LoopbackSwitch::with_loss(WORLD_SIZE, &config, LossModel::new(0.001, 0.001, 1))?;

    let results = std::thread::scope(|s| {
        let handles: Vec<_> = (0..WORLD_SIZE as Rank)
            .map(|rank| {
                let fabric = switch.fabric(rank);
                let config = config.clone();
                s.spawn(move || -> poolreduce::Result<_> {
                    let mut reducer = Reducer::new(config, &fabric)?;
                    let mut data = vec![0.0f32; COUNT];
                    let mut elapsed = Duration::ZERO;

                    for iter in 0..WARMUP + ITERS {
                        fill(&mut data, rank, iter);
                        let start = Instant::now();
                        reducer.all_reduce(&mut data)?;
                        if iter >= WARMUP {
                            elapsed += start.elapsed();
                        }

                        let want = expected(iter);
                        if let Some(i) = data.iter().position(|v| *v != want) {
                            panic!(
                                "rank {rank} iteration {iter}: element {i} is {}, expected {want}",
                                data[i]
                            );
                        }
                    }

                    let stats = reducer.stats();
                    reducer.shutdown()?;
                    Ok((rank, elapsed, stats))
                })
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(worker, h)| h.join().map_err(|_| ReduceError::WorkerPanicked { worker })?)
            .collect::<poolreduce::Result<Vec<_>>>()
    })?;

    let bytes = (COUNT * std::mem::size_of::<f32>() * ITERS) as f64;
    let mut slowest = Duration::ZERO;
    for (rank, elapsed, stats) in &results {
        slowest = slowest.max(*elapsed);
        println!(
            "rank {rank}: {ITERS} x {COUNT} f32 in {elapsed:?} ({:.3} GB/s), chunks acked {}, retransmissions {}, stale {}",
            bytes / elapsed.as_secs_f64() / 1e9,
            stats.chunks_acked,
            stats.retransmissions,
            stats.stale_notifications
        );
    }
    println!(
        "all ranks: {:.3} GB/s per rank, {:.1} us per reduction (slowest rank)",
        bytes / slowest.as_secs_f64() / 1e9,
        slowest.as_secs_f64() * 1e6 / ITERS as f64
    );
    println!("switch: {:?}", switch.stats()?);
    Ok(())
}
