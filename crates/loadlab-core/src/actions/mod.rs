//! The load-action contract and the four experiment implementations.
//!
//! Every experiment validates its parameters in its constructor (no
//! resource is touched before `execute`), runs until it finishes naturally
//! or its cancellation token fires, and releases everything it acquired
//! before `execute` returns, whichever way it exits.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ValidationError;

mod cpu_stress;
mod disk_storm;
mod memory_surge;
mod traffic_flood;

pub use cpu_stress::CpuStress;
pub use disk_storm::DiskStorm;
pub use memory_surge::MemorySurge;
pub use traffic_flood::TrafficFlood;

/// How an experiment run ended, short of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
}

/// Capability every load experiment exposes to the supervisor.
#[async_trait]
pub trait LoadAction: Send + Sync {
    /// Run the experiment to completion or until `cancel` fires.
    /// Cancellation must be observed within one second on every path.
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<Outcome>;

    /// Current progress in [0, 1]; cheap, concurrent-safe, non-decreasing.
    fn progress(&self) -> f64;
}

/// Elapsed-over-duration progress shared by the time-bounded experiments.
///
/// This reports wall-clock share, not work done; disk-storm counts
/// substeps instead. The two definitions are deliberately not normalized.
#[derive(Debug)]
pub(crate) struct TimedProgress {
    duration: Duration,
    started: OnceLock<Instant>,
}

impl TimedProgress {
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            duration,
            started: OnceLock::new(),
        }
    }

    /// Record the start instant; only the first call takes effect.
    pub(crate) fn begin(&self) -> Instant {
        *self.started.get_or_init(Instant::now)
    }

    pub(crate) fn value(&self) -> f64 {
        let Some(started) = self.started.get() else {
            return 0.0;
        };
        let elapsed = started.elapsed();
        if elapsed >= self.duration {
            1.0
        } else {
            elapsed.as_secs_f64() / self.duration.as_secs_f64()
        }
    }
}

pub(crate) fn check_range(
    param: &'static str,
    min: u64,
    max: u64,
    got: u64,
) -> Result<(), ValidationError> {
    if got < min || got > max {
        return Err(ValidationError::OutOfRange {
            param,
            min,
            max,
            got,
        });
    }
    Ok(())
}
