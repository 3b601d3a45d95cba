use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::actions::{check_range, LoadAction, Outcome, TimedProgress};
use crate::error::ValidationError;

pub const MAX_SIZE_MB: u64 = 2048;
pub const MAX_DURATION_SECS: u64 = 60;

const CHUNK_SIZE: usize = 1024 * 1024;
const ALLOCATION_PACING: Duration = Duration::from_millis(10);
const TOUCH_INTERVAL: Duration = Duration::from_millis(100);

/// Holds a configured amount of freshly written memory for a duration.
///
/// Allocation happens in 1 MiB chunks with a short pause between chunks;
/// each chunk is filled with varying bytes so lazy-commit kernels actually
/// back the pages, and one byte per chunk is read every 100 ms to keep
/// them resident. Every exit path drops the chunk list before returning.
pub struct MemorySurge {
    size_mb: u64,
    duration: Duration,
    progress: TimedProgress,
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl MemorySurge {
    pub fn new(size_mb: u64, duration_seconds: u64) -> Result<Self, ValidationError> {
        check_range("size_mb", 1, MAX_SIZE_MB, size_mb)?;
        check_range("duration_seconds", 1, MAX_DURATION_SECS, duration_seconds)?;
        let duration = Duration::from_secs(duration_seconds);
        Ok(Self {
            size_mb,
            duration,
            progress: TimedProgress::new(duration),
            chunks: Mutex::new(Vec::new()),
        })
    }

    fn chunks(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.chunks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch_chunks(&self) {
        let chunks = self.chunks();
        for chunk in chunks.iter() {
            if let Some(byte) = chunk.first() {
                std::hint::black_box(*byte);
            }
        }
    }

    fn release(&self) {
        let mut chunks = self.chunks();
        chunks.clear();
        chunks.shrink_to_fit();
    }
}

#[async_trait]
impl LoadAction for MemorySurge {
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<Outcome> {
        let started = self.progress.begin();
        let end = started + self.duration;

        self.chunks().reserve(self.size_mb as usize);
        for _ in 0..self.size_mb {
            if cancel.is_cancelled() {
                self.release();
                return Ok(Outcome::Cancelled);
            }
            let mut chunk = vec![0u8; CHUNK_SIZE];
            for (offset, byte) in chunk.iter_mut().enumerate() {
                *byte = (offset % 256) as u8;
            }
            self.chunks().push(chunk);
            tokio::time::sleep(ALLOCATION_PACING).await;
        }

        let mut tick = tokio::time::interval(TOUCH_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.release();
                    return Ok(Outcome::Cancelled);
                }
                _ = tick.tick() => {
                    if Instant::now() >= end {
                        self.release();
                        return Ok(Outcome::Completed);
                    }
                    self.touch_chunks();
                }
            }
        }
    }

    fn progress(&self) -> f64 {
        self.progress.value()
    }
}
