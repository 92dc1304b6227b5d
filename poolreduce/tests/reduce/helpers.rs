use poolreduce::{LogOnFatal, LossModel, Rank, ReduceConfig, Reducer, SwitchStats};
use poolreduce::LoopbackSwitch;
use std::sync::Arc;
use std::time::Duration;

/// Small-message config so short buffers still span several chunks.
pub fn small_config(workers: usize, slots: usize) -> ReduceConfig {
    ReduceConfig {
        num_workers: workers,
        slots_per_worker: slots,
        message_size: 64,
        packet_size: 16,
        retransmit_timeout: Duration::from_millis(1),
        poll_batch: None,
    }
}

/// Run `f` on `world_size` participants concurrently, each with its own
/// reducer attached to one shared loopback switch. Returns the switch's
/// counters once every participant has shut down.
pub fn run_reduction<F>(
    world_size: usize,
    config: ReduceConfig,
    loss: LossModel,
    f: F,
) -> SwitchStats
where
    F: Fn(Rank, &mut Reducer) + Send + Sync,
{
    let switch = LoopbackSwitch::with_loss(world_size, &config, loss).unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..world_size as Rank)
            .map(|rank| {
                let fabric = switch.fabric(rank);
                let config = config.clone();
                let f = &f;
                s.spawn(move || {
                    let mut reducer =
                        Reducer::with_fatal_handler(config, &fabric, Arc::new(LogOnFatal))
                            .unwrap();
                    f(rank, &mut reducer);
                    reducer.shutdown().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    });

    switch.stats().unwrap()
}

/// Element `i` of rank `rank`'s input: small integers so f32 sums are exact.
pub fn input(rank: Rank, i: usize) -> f32 {
    ((i % 97) as f32) * (rank as f32 + 1.0)
}

/// Expected sum of [`input`] over `world_size` ranks.
pub fn expected(world_size: usize, i: usize) -> f32 {
    let ranks: f32 = (1..=world_size).map(|r| r as f32).sum();
    ((i % 97) as f32) * ranks
}
