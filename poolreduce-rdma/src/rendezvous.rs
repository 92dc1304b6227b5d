//! Resolving local queue pairs to their remote counterparts.

use std::collections::HashMap;

use crate::endpoint::RdmaEndpoint;
use crate::error::{RdmaError, Result};
use poolreduce::WorkerId;

/// Exchanges endpoints with the remote side (switch controller or peer).
///
/// Called once per worker group, before any traffic. `local` holds one
/// endpoint per slot; the result must hold the matching remote endpoint
/// for each slot, in the same order.
pub trait Rendezvous: Send + Sync {
    fn resolve(&self, worker: WorkerId, local: &[RdmaEndpoint]) -> Result<Vec<RdmaEndpoint>>;
}

/// Endpoint tables distributed ahead of time, keyed by worker.
#[derive(Debug, Clone, Default)]
pub struct StaticRendezvous {
    remotes: HashMap<WorkerId, Vec<RdmaEndpoint>>,
}

impl StaticRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(mut self, worker: WorkerId, remotes: Vec<RdmaEndpoint>) -> Self {
        self.remotes.insert(worker, remotes);
        self
    }

    /// Load a worker's table from its serialised form.
    pub fn insert_encoded(&mut self, worker: WorkerId, bytes: &[u8]) -> Result<()> {
        self.remotes.insert(worker, RdmaEndpoint::decode_all(bytes)?);
        Ok(())
    }
}

impl Rendezvous for StaticRendezvous {
    fn resolve(&self, worker: WorkerId, local: &[RdmaEndpoint]) -> Result<Vec<RdmaEndpoint>> {
        let remotes = self
            .remotes
            .get(&worker)
            .ok_or_else(|| RdmaError::Rendezvous {
                worker,
                reason: "no endpoint table".into(),
            })?;
        if remotes.len() != local.len() {
            return Err(RdmaError::Rendezvous {
                worker,
                reason: format!(
                    "{} remote endpoints for {} local slots",
                    remotes.len(),
                    local.len()
                ),
            });
        }
        for (slot, ep) in local.iter().enumerate() {
            tracing::debug!(worker, slot, qp_num = ep.qp_num, psn = ep.psn, "local endpoint");
        }
        Ok(remotes.clone())
    }
}
