//! RDMA channel groups for poolreduce.
//!
//! Implements [`poolreduce::Fabric`] over ibverbs: one completion queue
//! per worker group, one queue pair per slot, and chunk transfers posted
//! as RDMA writes with immediate. The sequence tag travels in the
//! immediate value, and in the rkey when an aggregating switch terminates
//! the writes.
//!
//! ```ignore
//! use poolreduce::{ReduceConfig, Reducer};
//! use poolreduce_rdma::{RdmaFabric, RdmaOptions, StaticRendezvous};
//!
//! let rendezvous = StaticRendezvous::new().with_worker(0, remote_endpoints);
//! let config = ReduceConfig::default();
//! let fabric = RdmaFabric::open(&config, RdmaOptions::default(), len, Arc::new(rendezvous))?;
//! let mut reducer = Reducer::new(config, &fabric)?;
//! let data = unsafe { fabric.region().as_mut_slice::<f32>() };
//! reducer.all_reduce(data)?;
//! ```

mod context;
pub mod endpoint;
pub mod error;
mod fabric;
mod group;
mod mr;
mod qp;
pub mod rendezvous;

pub use context::RdmaContext;
pub use endpoint::{ENDPOINT_SIZE, RdmaEndpoint};
pub use error::{RdmaError, Result};
pub use fabric::{RdmaFabric, RdmaOptions};
pub use group::{Addressing, RdmaChannelGroup};
pub use mr::RdmaRegion;
pub use qp::{QpKind, QpOptions, path_mtu};
pub use rendezvous::{Rendezvous, StaticRendezvous};
