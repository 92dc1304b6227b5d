//! Self-connected RDMA groups: every queue pair is its own remote, so a
//! single participant's all-reduce round-trips through the NIC and leaves
//! the data unchanged.
//!
//! Skipped (with a log line) on machines without an RDMA device.

use std::sync::Arc;

use poolreduce::{LogOnFatal, ReduceConfig, Reducer, WorkerId};
use poolreduce_rdma::{
    Addressing, RdmaEndpoint, RdmaError, RdmaFabric, RdmaOptions, Rendezvous, Result,
};

/// Resolves each local endpoint to itself.
struct SelfRendezvous;

impl Rendezvous for SelfRendezvous {
    fn resolve(&self, _worker: WorkerId, local: &[RdmaEndpoint]) -> Result<Vec<RdmaEndpoint>> {
        Ok(local.to_vec())
    }
}

fn open_fabric(len: usize) -> Option<RdmaFabric> {
    let options = RdmaOptions {
        addressing: Addressing::Peer,
        ..RdmaOptions::default()
    };
    match RdmaFabric::open(&config(), options, len, Arc::new(SelfRendezvous)) {
        Ok(fabric) => Some(fabric),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

fn config() -> ReduceConfig {
    ReduceConfig {
        num_workers: 2,
        slots_per_worker: 4,
        message_size: 256,
        packet_size: 256,
        ..ReduceConfig::default()
    }
}

#[test]
fn test_self_connected_reduction_is_identity() {
    let count = 4096usize;
    let Some(fabric) = open_fabric(count * 4) else {
        return;
    };
    let mut reducer =
        Reducer::with_fatal_handler(config(), &fabric, Arc::new(LogOnFatal)).unwrap();

    let data = unsafe { fabric.region().as_mut_slice::<f32>() };
    for (i, v) in data.iter_mut().enumerate() {
        *v = i as f32;
    }
    reducer.all_reduce(data).unwrap();
    reducer.all_reduce(data).unwrap();
    assert!(data.iter().enumerate().all(|(i, v)| *v == i as f32));

    let stats = reducer.stats();
    assert_eq!(stats.reductions, 2);
    // 4096 * 4 bytes / 256 per chunk, twice.
    assert_eq!(stats.chunks_acked, 128);
    reducer.shutdown().unwrap();
}

#[test]
fn test_open_rejects_packet_size_without_mtu() {
    let config = ReduceConfig {
        message_size: 1536,
        packet_size: 768,
        ..config()
    };
    let result = RdmaFabric::open(
        &config,
        RdmaOptions::default(),
        4096,
        Arc::new(SelfRendezvous),
    );
    assert!(matches!(result, Err(RdmaError::PacketSize(768))));
}

#[test]
fn test_buffer_outside_region_fails() {
    let Some(fabric) = open_fabric(4096) else {
        return;
    };
    let mut reducer =
        Reducer::with_fatal_handler(config(), &fabric, Arc::new(LogOnFatal)).unwrap();
    let mut outside = vec![0.0f32; 128];
    assert!(reducer.all_reduce(&mut outside).is_err());
}
