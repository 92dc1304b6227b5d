use poolreduce::{LossModel, ReduceConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::helpers::{expected, input, run_reduction, small_config};

fn lossy_config() -> ReduceConfig {
    ReduceConfig {
        retransmit_timeout: Duration::from_micros(200),
        ..small_config(2, 2)
    }
}

#[test]
fn test_ingress_and_egress_loss_recovered() {
    let loss = LossModel::new(0.1, 0.1, 7);
    let stats = run_reduction(3, lossy_config(), loss, |rank, reducer| {
        let mut data: Vec<f32> = (0..800).map(|i| input(rank, i)).collect();
        reducer.all_reduce(&mut data).unwrap();
        let want: Vec<f32> = (0..800).map(|i| expected(3, i)).collect();
        assert_eq!(data, want, "rank {rank} lossy allreduce failed");
    });
    assert!(stats.ingress_dropped + stats.egress_dropped > 0);
    assert!(stats.resends + stats.duplicates > 0);
}

#[test]
fn test_retransmissions_counted() {
    let loss = LossModel::new(0.2, 0.0, 11);
    let retransmissions = AtomicU64::new(0);
    let stats = run_reduction(2, lossy_config(), loss, |rank, reducer| {
        let mut data = vec![(rank + 1) as i32; 512];
        reducer.all_reduce(&mut data).unwrap();
        assert_eq!(data, vec![3; 512]);
        retransmissions.fetch_add(reducer.stats().retransmissions, Ordering::Relaxed);
    });
    // Every dropped contribution is recovered by at least one resend.
    assert!(stats.ingress_dropped > 0);
    assert!(retransmissions.load(Ordering::Relaxed) >= stats.ingress_dropped);
}

#[test]
fn test_repeated_lossy_invocations() {
    let loss = LossModel::new(0.05, 0.05, 3);
    run_reduction(2, lossy_config(), loss, |rank, reducer| {
        for round in 0..5 {
            let mut data = vec![(rank + round) as i32; 100];
            reducer.all_reduce(&mut data).unwrap();
            assert_eq!(data, vec![(1 + 2 * round) as i32; 100], "round {round}");
        }
    });
}

#[test]
fn test_duplicated_results_are_stale_and_sums_hold() {
    let loss = LossModel::new(0.0, 0.0, 5).with_duplicates(0.2);
    let stale = AtomicU64::new(0);
    let stats = run_reduction(2, lossy_config(), loss, |rank, reducer| {
        for round in 0..3 {
            let mut data: Vec<f32> = (0..800).map(|i| input(rank, i)).collect();
            reducer.all_reduce(&mut data).unwrap();
            let want: Vec<f32> = (0..800).map(|i| expected(2, i)).collect();
            assert_eq!(data, want, "rank {rank} round {round}");
        }
        stale.fetch_add(reducer.stats().stale_notifications, Ordering::Relaxed);
    });
    assert!(stats.egress_duplicated > 0);
    assert!(stale.load(Ordering::Relaxed) > 0);
}
