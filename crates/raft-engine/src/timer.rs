//! # timer
//!
//! why: randomized election timeouts keep split votes rare
//! relations: owned by node.rs, polled by server.rs against a Clock reading
//! what: ElectionTimer with restart, reset, force_elapse, has_elapsed

use crate::error::{RaftError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// countdown against an externally supplied clock reading; never sleeps
#[derive(Debug, Clone)]
pub struct ElectionTimer {
    min_nanos: u64,
    max_nanos: u64,
    timer_start: Duration,
    timeout: Duration,
    rng: StdRng,
}

impl ElectionTimer {
    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        Self::with_rng(min, max, StdRng::from_entropy())
    }

    /// deterministic timer for tests and simulations
    pub fn with_seed(min: Duration, max: Duration, seed: u64) -> Result<Self> {
        Self::with_rng(min, max, StdRng::seed_from_u64(seed))
    }

    fn with_rng(min: Duration, max: Duration, rng: StdRng) -> Result<Self> {
        if min > max {
            return Err(RaftError::config(format!(
                "election timeout min {min:?} is greater than max {max:?}"
            )));
        }
        let max_nanos = u64::try_from(max.as_nanos()).map_err(|_| {
            RaftError::config(format!("election timeout max {max:?} does not fit in u64 nanoseconds"))
        })?;
        // min <= max, so it fits too
        let min_nanos = min.as_nanos() as u64;
        Ok(Self {
            min_nanos,
            max_nanos,
            timer_start: Duration::ZERO,
            timeout: max,
            rng,
        })
    }

    /// draws a fresh random timeout and starts counting from `now`
    pub fn restart(&mut self, now: Duration) {
        let nanos = self.rng.gen_range(self.min_nanos..=self.max_nanos);
        self.timeout = Duration::from_nanos(nanos);
        self.timer_start = now;
    }

    /// starts counting from `now` with the current timeout
    pub fn reset(&mut self, now: Duration) {
        self.timer_start = now;
    }

    /// the next `has_elapsed` returns true whatever the time
    pub fn force_elapse(&mut self) {
        self.timeout = Duration::ZERO;
    }

    pub fn has_elapsed(&self, now: Duration) -> bool {
        now.saturating_sub(self.timer_start) >= self.timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
