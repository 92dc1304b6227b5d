use poolreduce::{
    ChannelGroup, Fabric, LogOnFatal, Notification, NotificationKind, ReduceError, Reducer,
    Result, Transfer, WorkerId,
};
use std::sync::{Arc, Mutex};

use super::helpers::small_config;

#[derive(Clone, Copy)]
enum Fault {
    RejectPosts,
    ErrorCompletions,
}

struct FaultyGroup {
    slots: usize,
    fault: Fault,
    pending: Vec<Notification>,
}

impl ChannelGroup for FaultyGroup {
    fn len(&self) -> usize {
        self.slots
    }

    fn post_transfer(&mut self, slot: usize, _transfer: &Transfer) -> Result<()> {
        match self.fault {
            Fault::RejectPosts => Err(ReduceError::ChannelPost {
                slot,
                reason: "send queue full".into(),
            }),
            Fault::ErrorCompletions => {
                self.pending.push(Notification::failed(
                    slot,
                    NotificationKind::SendComplete,
                    "remote access error",
                ));
                Ok(())
            }
        }
    }

    fn repost_receive(&mut self, _slot: usize) -> Result<()> {
        Ok(())
    }

    fn poll(&mut self, out: &mut Vec<Notification>, max: usize) -> Result<usize> {
        let n = max.min(self.pending.len());
        out.extend(self.pending.drain(..n));
        Ok(n)
    }
}

struct FaultyFabric {
    fault: Fault,
    group_slots: Option<usize>,
}

impl FaultyFabric {
    fn new(fault: Fault) -> Self {
        Self {
            fault,
            group_slots: None,
        }
    }
}

impl Fabric for FaultyFabric {
    fn create_group(&self, _worker: WorkerId, slots: usize) -> Result<Box<dyn ChannelGroup>> {
        Ok(Box::new(FaultyGroup {
            slots: self.group_slots.unwrap_or(slots),
            fault: self.fault,
            pending: Vec::new(),
        }))
    }
}

struct NoDevice;

impl Fabric for NoDevice {
    fn create_group(&self, _worker: WorkerId, _slots: usize) -> Result<Box<dyn ChannelGroup>> {
        Err(ReduceError::channel("no device"))
    }
}

#[test]
fn test_rejected_post_fails_job() {
    let fabric = FaultyFabric::new(Fault::RejectPosts);
    let mut reducer =
        Reducer::with_fatal_handler(small_config(2, 2), &fabric, Arc::new(LogOnFatal)).unwrap();

    // A single chunk: only worker 0 has anything to post.
    let mut data = vec![1.0f32; 4];
    let err = reducer.all_reduce(&mut data).unwrap_err();
    match err {
        ReduceError::JobFailed {
            reduction_id,
            failed_workers,
        } => {
            assert_eq!(reduction_id, 1);
            assert_eq!(failed_workers, vec![0]);
        }
        other => panic!("unexpected error: {other}"),
    }
    reducer.shutdown().unwrap();
}

#[test]
fn test_error_completion_reaches_handler() {
    let seen: Arc<Mutex<Vec<(WorkerId, u64, String)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let handler = move |worker: WorkerId, id: u64, e: &ReduceError| {
        sink.lock().unwrap().push((worker, id, e.to_string()));
    };

    let fabric = FaultyFabric::new(Fault::ErrorCompletions);
    let mut reducer =
        Reducer::with_fatal_handler(small_config(2, 1), &fabric, Arc::new(handler)).unwrap();

    // Two chunks, one per worker; both see an error completion.
    let mut data = vec![0i32; 32];
    assert!(reducer.all_reduce(&mut data).is_err());

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen.len(), 2);
    assert_eq!((seen[0].0, seen[0].1), (0, 1));
    assert_eq!((seen[1].0, seen[1].1), (1, 1));
    assert!(seen[0].2.contains("remote access error"));
    drop(reducer);
}

#[test]
fn test_workers_recover_for_next_invocation() {
    let fabric = FaultyFabric::new(Fault::RejectPosts);
    let mut reducer =
        Reducer::with_fatal_handler(small_config(1, 1), &fabric, Arc::new(LogOnFatal)).unwrap();
    let mut data = vec![0.0f32; 4];
    for id in 1..=3 {
        match reducer.all_reduce(&mut data) {
            Err(ReduceError::JobFailed { reduction_id, .. }) => assert_eq!(reduction_id, id),
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!(reducer.stats().reductions, 3);
}

#[test]
fn test_group_creation_failure_aborts_construction() {
    let err = Reducer::new(small_config(2, 2), &NoDevice).err().unwrap();
    assert!(matches!(err, ReduceError::ChannelGroup { .. }));
}

#[test]
fn test_group_size_mismatch_rejected() {
    let fabric = FaultyFabric {
        fault: Fault::RejectPosts,
        group_slots: Some(3),
    };
    assert!(Reducer::new(small_config(1, 2), &fabric).is_err());
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = small_config(1, 1);
    config.message_size = 60;
    let err = Reducer::new(config, &NoDevice).err().unwrap();
    assert!(matches!(err, ReduceError::InvalidConfig { .. }));
}
