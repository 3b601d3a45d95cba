use std::thread::available_parallelism;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::actions::{check_range, LoadAction, Outcome, TimedProgress};
use crate::error::ValidationError;

pub const MAX_TARGET_PERCENT: u64 = 95;
pub const MAX_DURATION_SECS: u64 = 30;

/// Burns CPU with busy arithmetic on a share of the host's cores.
///
/// Targeting is coarse: `max(1, cores * target / 100)` workers spin at
/// full tilt until the end time. Each worker re-checks cancellation
/// between short arithmetic bursts, well inside the one-second bound.
pub struct CpuStress {
    target_percent: u32,
    duration: Duration,
    progress: TimedProgress,
}

impl CpuStress {
    pub fn new(target_percent: u32, duration_seconds: u64) -> Result<Self, ValidationError> {
        check_range("target_percent", 1, MAX_TARGET_PERCENT, u64::from(target_percent))?;
        check_range("duration_seconds", 1, MAX_DURATION_SECS, duration_seconds)?;
        let duration = Duration::from_secs(duration_seconds);
        Ok(Self {
            target_percent,
            duration,
            progress: TimedProgress::new(duration),
        })
    }

    fn worker_count(&self) -> usize {
        let cores = available_parallelism().map(|n| n.get()).unwrap_or(1);
        (cores * self.target_percent as usize / 100).max(1)
    }
}

fn burn_until(end: Instant, cancel: &CancellationToken) {
    while !cancel.is_cancelled() && Instant::now() < end {
        let mut acc: u64 = 0;
        for i in 0..1_000_000u64 {
            acc = acc.wrapping_add(i);
        }
        std::hint::black_box(acc);
    }
}

#[async_trait]
impl LoadAction for CpuStress {
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<Outcome> {
        let started = self.progress.begin();
        let end = started + self.duration;

        let workers: Vec<_> = (0..self.worker_count())
            .map(|_| {
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || burn_until(end, &cancel))
            })
            .collect();
        join_all(workers).await;

        if cancel.is_cancelled() {
            Ok(Outcome::Cancelled)
        } else {
            Ok(Outcome::Completed)
        }
    }

    fn progress(&self) -> f64 {
        self.progress.value()
    }
}
