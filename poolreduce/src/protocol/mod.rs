//! Sliding-window retransmitting protocol run by each worker thread.

pub mod clock;
pub mod engine;
pub mod range;
pub mod tag;
pub mod timeout_queue;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use engine::{EngineStats, WindowEngine};
pub use range::{ChunkRange, total_chunks};
pub use tag::SequenceTag;
pub use timeout_queue::TimeoutQueue;
