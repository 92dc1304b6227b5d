use poolreduce::LossModel;

use super::helpers::{expected, input, run_reduction, small_config};

#[test]
fn test_allreduce_2_ranks_f32() {
    run_reduction(2, small_config(1, 1), LossModel::lossless(), |rank, reducer| {
        let val = (rank + 1) as f32;
        let mut data = vec![val; 4];
        reducer.all_reduce(&mut data).unwrap();
        assert_eq!(data, vec![3.0f32; 4], "rank {rank} allreduce failed");
    });
}

#[test]
fn test_allreduce_4_ranks_i32() {
    run_reduction(4, small_config(2, 2), LossModel::lossless(), |rank, reducer| {
        let mut data = vec![(rank + 1) as i32; 100];
        reducer.all_reduce(&mut data).unwrap();
        assert_eq!(data, vec![10i32; 100], "rank {rank} allreduce failed");
    });
}

#[test]
fn test_allreduce_uneven_tail_chunk() {
    // 1000 floats = 4000 bytes = 62 full chunks plus a 32-byte tail.
    run_reduction(3, small_config(3, 4), LossModel::lossless(), |rank, reducer| {
        let mut data: Vec<f32> = (0..1000).map(|i| input(rank, i)).collect();
        reducer.all_reduce(&mut data).unwrap();
        let want: Vec<f32> = (0..1000).map(|i| expected(3, i)).collect();
        assert_eq!(data, want, "rank {rank} uneven allreduce failed");
    });
}

#[test]
fn test_five_chunks_two_workers_two_slots() {
    // 5 chunks of 16 floats: worker 0 owns [0, 3), worker 1 owns [3, 5).
    let stats = run_reduction(2, small_config(2, 2), LossModel::lossless(), |rank, reducer| {
        let mut data: Vec<f32> = (0..80).map(|i| input(rank, i)).collect();
        reducer.all_reduce(&mut data).unwrap();
        let want: Vec<f32> = (0..80).map(|i| expected(2, i)).collect();
        assert_eq!(data, want);

        let per_worker: Vec<u64> = reducer.worker_stats().iter().map(|s| s.chunks_acked).collect();
        assert_eq!(per_worker, vec![3, 2]);
        assert_eq!(reducer.stats().chunks_acked, 5);
    });
    assert_eq!(stats.completions, 5);
}

#[test]
fn test_buffer_smaller_than_worker_count() {
    // One chunk, four workers: three of them sit the job out.
    run_reduction(2, small_config(4, 2), LossModel::lossless(), |rank, reducer| {
        let mut data = vec![rank as i32 + 5; 3];
        reducer.all_reduce(&mut data).unwrap();
        assert_eq!(data, vec![11; 3]);
    });
}

#[test]
fn test_empty_buffer_round_trips() {
    let stats = run_reduction(3, small_config(2, 2), LossModel::lossless(), |_, reducer| {
        let mut data: Vec<f32> = Vec::new();
        reducer.all_reduce(&mut data).unwrap();
        assert_eq!(reducer.stats().chunks_acked, 1);
    });
    assert_eq!(stats.completions, 1);
}

#[test]
fn test_single_rank_is_identity() {
    run_reduction(1, small_config(2, 3), LossModel::lossless(), |_, reducer| {
        let mut data: Vec<f32> = (0..500).map(|i| input(0, i)).collect();
        let before = data.clone();
        reducer.all_reduce(&mut data).unwrap();
        assert_eq!(data, before);
    });
}

#[test]
fn test_raw_pointer_entry_point() {
    run_reduction(2, small_config(1, 2), LossModel::lossless(), |rank, reducer| {
        let mut data = vec![(rank + 1) as f32; 40];
        let ptr = data.as_mut_ptr() as u64;
        unsafe {
            reducer
                .all_reduce_raw(ptr, data.len(), poolreduce::DataType::F32)
                .unwrap();
        }
        assert_eq!(data, vec![3.0f32; 40]);
    });
}
