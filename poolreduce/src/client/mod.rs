mod barrier;
mod fatal;
mod job;
mod reducer;
mod worker;

pub use barrier::SenseBarrier;
pub use fatal::{ExitOnFatal, FatalHandler, LogOnFatal};
pub use reducer::{Reducer, ReducerOptions, ReducerStats};
