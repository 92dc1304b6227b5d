use std::sync::{Condvar, Mutex};

use crate::error::{ReduceError, Result};

#[derive(Debug)]
struct BarrierState {
    remaining: usize,
    sense: bool,
    aborted: bool,
}

/// Reusable sense-reversing counting barrier.
///
/// The last of `size` arrivals flips the shared sense, resets the count
/// and wakes everyone; waiters block until the sense differs from the one
/// they saw on entry, so the same barrier can be crossed any number of
/// times by the same threads.
#[derive(Debug)]
pub struct SenseBarrier {
    size: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl SenseBarrier {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(BarrierState {
                remaining: size,
                sense: false,
                aborted: false,
            }),
            cvar: Condvar::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Block until all `size` participants have arrived.
    ///
    /// Returns `true` for exactly one participant per round (the last to
    /// arrive), and [`ReduceError::ShutDown`] once the barrier is aborted.
    pub fn wait(&self) -> Result<bool> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ReduceError::LockPoisoned("barrier"))?;
        if state.aborted {
            return Err(ReduceError::ShutDown);
        }
        let entry_sense = state.sense;

        state.remaining -= 1;
        if state.remaining == 0 {
            state.remaining = self.size;
            state.sense = !entry_sense;
            self.cvar.notify_all();
            return Ok(true);
        }

        while state.sense == entry_sense {
            if state.aborted {
                return Err(ReduceError::ShutDown);
            }
            state = self
                .cvar
                .wait(state)
                .map_err(|_| ReduceError::LockPoisoned("barrier"))?;
        }
        Ok(false)
    }

    /// Release every current and future waiter with an error.
    pub fn abort(&self) {
        match self.state.lock() {
            Ok(mut state) => state.aborted = true,
            Err(poisoned) => poisoned.into_inner().aborted = true,
        }
        self.cvar.notify_all();
    }
}
