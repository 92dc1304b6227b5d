use std::sync::Arc;

use poolreduce::{ChannelGroup, Fabric, ReduceConfig, ReduceError, Result, WorkerId};

use crate::context::RdmaContext;
use crate::endpoint::RdmaEndpoint;
use crate::error::RdmaError;
use crate::group::{Addressing, RdmaChannelGroup};
use crate::mr::RdmaRegion;
use crate::qp::{QpOptions, QueuePair, path_mtu};
use crate::rendezvous::Rendezvous;

/// Device selection and per-queue-pair parameters.
#[derive(Debug, Clone, Copy)]
pub struct RdmaOptions {
    /// Device index in the verbs device list. First device when `None`.
    pub device_index: Option<usize>,
    pub port_num: u8,
    pub gid_index: u8,
    pub qp: QpOptions,
    pub addressing: Addressing,
}

impl Default for RdmaOptions {
    fn default() -> Self {
        Self {
            device_index: None,
            port_num: 1,
            gid_index: 0,
            qp: QpOptions::default(),
            addressing: Addressing::Switch,
        }
    }
}

/// Channel groups over RDMA queue pairs.
///
/// The fabric owns the registered reduction region. Every `all_reduce`
/// driven through groups from this fabric must operate on memory inside
/// [`region`](Self::region).
pub struct RdmaFabric {
    ctx: Arc<RdmaContext>,
    region: Arc<RdmaRegion>,
    rendezvous: Arc<dyn Rendezvous>,
    options: RdmaOptions,
    mtu: ibverbs_sys::ibv_mtu,
    slots_per_worker: usize,
}

/// Validate `config` and pick the path MTU for its packet size.
fn wire_mtu(config: &ReduceConfig) -> crate::Result<ibverbs_sys::ibv_mtu> {
    config.validate()?;
    path_mtu(config.packet_size)
}

impl RdmaFabric {
    /// Open the device and register a `region_len`-byte reduction region
    /// for reducers built from `config`.
    ///
    /// Queue pairs run at a path MTU equal to `config.packet_size`, so the
    /// packet size must be one of the verbs MTUs.
    pub fn open(
        config: &ReduceConfig,
        options: RdmaOptions,
        region_len: usize,
        rendezvous: Arc<dyn Rendezvous>,
    ) -> crate::Result<Self> {
        let mtu = wire_mtu(config)?;
        let ctx = RdmaContext::open(options.device_index, options.port_num, options.gid_index)?;
        let region = Arc::new(ctx.register(region_len)?);
        tracing::info!(
            region_len,
            addr = region.addr(),
            packet_size = config.packet_size,
            "reduction region registered"
        );
        Ok(Self {
            ctx,
            region,
            rendezvous,
            options,
            mtu,
            slots_per_worker: config.slots_per_worker,
        })
    }

    pub fn region(&self) -> &RdmaRegion {
        &self.region
    }

    pub fn options(&self) -> &RdmaOptions {
        &self.options
    }

    fn build_group(&self, worker: WorkerId, slots: usize) -> crate::Result<RdmaChannelGroup> {
        if slots != self.slots_per_worker {
            return Err(ReduceError::channel(format!(
                "worker {worker}: {slots} slots requested, fabric opened for {}",
                self.slots_per_worker
            ))
            .into());
        }
        let qp_opts = &self.options.qp;
        let depth = slots * (qp_opts.max_send_wr + qp_opts.max_recv_wr) as usize;
        let cq = self.ctx.create_cq(depth.max(1))?;

        let mut qps = Vec::with_capacity(slots);
        for _ in 0..slots {
            qps.push(QueuePair::create(&self.ctx, &cq, qp_opts)?);
        }
        let local: Vec<RdmaEndpoint> = qps
            .iter()
            .map(|qp| RdmaEndpoint {
                qp_num: qp.qp_num(),
                psn: qp.psn(),
                lid: 0,
                gid: self.ctx.gid(),
                addr: self.region.addr(),
                rkey: self.region.rkey(),
            })
            .collect();

        let remotes = self.rendezvous.resolve(worker, &local)?;
        if remotes.len() != slots {
            return Err(RdmaError::Rendezvous {
                worker,
                reason: format!("resolved {} endpoints for {slots} slots", remotes.len()),
            });
        }
        for (qp, remote) in qps.iter_mut().zip(&remotes) {
            qp.connect(&self.ctx, remote, qp_opts.kind, self.mtu)?;
        }

        tracing::debug!(worker, slots, kind = ?qp_opts.kind, "RDMA channel group connected");
        Ok(RdmaChannelGroup::new(
            worker,
            qps,
            remotes,
            cq,
            Arc::clone(&self.region),
            self.options.addressing,
            Arc::clone(&self.ctx),
        ))
    }
}

impl Fabric for RdmaFabric {
    fn create_group(&self, worker: WorkerId, slots: usize) -> Result<Box<dyn ChannelGroup>> {
        Ok(Box::new(self.build_group(worker, slots)?))
    }
}
