//! In-process aggregation switch.
//!
//! Models an in-network aggregation switch for any number of participants
//! inside one process: contributions to a pool index are summed per parity
//! set, results are written straight into each participant's buffer, and
//! seeded packet loss exercises the retransmission path.

mod loss;
mod pool;
mod switch;

pub use loss::LossModel;
pub use switch::{LoopbackFabric, LoopbackGroup, LoopbackSwitch, SwitchStats};
