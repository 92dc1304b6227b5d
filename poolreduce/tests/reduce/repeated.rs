use poolreduce::LossModel;

use super::helpers::{expected, input, run_reduction, small_config};

#[test]
fn test_consecutive_invocations_reuse_workers() {
    run_reduction(3, small_config(2, 2), LossModel::lossless(), |rank, reducer| {
        for round in 0..2 {
            let mut data = vec![(rank + round) as i32; 64];
            reducer.all_reduce(&mut data).unwrap();
            let want = (0..3).map(|r| (r + round) as i32).sum::<i32>();
            assert_eq!(data, vec![want; 64], "round {round}");
        }
        assert_eq!(reducer.stats().reductions, 2);
    });
}

#[test]
fn test_lengths_change_between_invocations() {
    let lengths = [1usize, 200, 0, 17, 64, 1000, 3];
    run_reduction(2, small_config(3, 2), LossModel::lossless(), |rank, reducer| {
        for &len in &lengths {
            let mut data: Vec<f32> = (0..len).map(|i| input(rank, i)).collect();
            reducer.all_reduce(&mut data).unwrap();
            let want: Vec<f32> = (0..len).map(|i| expected(2, i)).collect();
            assert_eq!(data, want, "len {len}");
        }
        assert_eq!(reducer.stats().reductions, lengths.len() as u64);
    });
}

#[test]
fn test_mixed_element_types() {
    run_reduction(2, small_config(2, 1), LossModel::lossless(), |rank, reducer| {
        let mut floats = vec![0.5f32 * (rank + 1) as f32; 33];
        reducer.all_reduce(&mut floats).unwrap();
        assert_eq!(floats, vec![1.5f32; 33]);

        let mut ints = vec![-(rank as i32); 33];
        reducer.all_reduce(&mut ints).unwrap();
        assert_eq!(ints, vec![-1; 33]);
    });
}
