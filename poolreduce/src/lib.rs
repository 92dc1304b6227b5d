//! In-network aggregated all-reduce over a windowed, retransmitting
//! channel protocol.
//!
//! A [`Reducer`] splits a buffer into message-sized chunks and streams them
//! from a pool of worker threads through a [`Fabric`]'s channel groups. The
//! aggregated result for each chunk comes back tagged with its pool index,
//! and is written in place.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod reduce;
pub mod transport;
pub mod types;

pub use client::{ExitOnFatal, FatalHandler, LogOnFatal, Reducer, ReducerOptions, ReducerStats};
pub use config::ReduceConfig;
pub use error::{ReduceError, Result};
pub use protocol::{Clock, ManualClock, MonotonicClock, SequenceTag};
pub use transport::{
    ChannelGroup, CompletionStatus, Fabric, LoopbackFabric, LoopbackSwitch, LossModel,
    Notification, NotificationKind, SwitchStats, Transfer,
};
pub use types::{DataType, Element, Rank, ReductionJob, WorkerId};
