use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::actions::{check_range, LoadAction, Outcome};
use crate::error::ValidationError;

pub const MAX_OPERATIONS: u64 = 10_000;
pub const MAX_FILE_SIZE_KB: u64 = 1024;
/// Total on-disk footprint cap: 100 MiB.
pub const MAX_TOTAL_KB: u64 = 100 * 1024;

const SCRATCH_PREFIX: &str = "disk-storm-";

/// Hammers the filesystem with write/read/delete cycles in a dedicated
/// scratch directory.
///
/// Each operation writes one file from a reused random buffer, reads it
/// back and deletes it; every substep advances the counter, so progress is
/// `completed_substeps / (3 * operations)` rather than elapsed time. The
/// created-files list exists solely so an abnormal exit can remove
/// leftovers; the scratch directory is removed on every exit path.
pub struct DiskStorm {
    operations: u32,
    file_size_kb: u32,
    total_substeps: u64,
    completed_substeps: Arc<AtomicU64>,
    created_files: Arc<Mutex<Vec<PathBuf>>>,
    scratch: Mutex<Option<TempDir>>,
}

impl DiskStorm {
    pub fn new(operations: u32, file_size_kb: u32) -> Result<Self, ValidationError> {
        check_range("operations", 1, MAX_OPERATIONS, u64::from(operations))?;
        check_range("file_size_kb", 1, MAX_FILE_SIZE_KB, u64::from(file_size_kb))?;

        let total_kb = u64::from(operations) * u64::from(file_size_kb);
        if total_kb > MAX_TOTAL_KB {
            return Err(ValidationError::DiskFootprintExceeded {
                total_kb,
                limit_kb: MAX_TOTAL_KB,
            });
        }

        Ok(Self {
            operations,
            file_size_kb,
            total_substeps: u64::from(operations) * 3,
            completed_substeps: Arc::new(AtomicU64::new(0)),
            created_files: Arc::new(Mutex::new(Vec::new())),
            scratch: Mutex::new(None),
        })
    }

    /// Scratch directory path while the experiment is running; `None`
    /// before `execute` and after cleanup.
    pub fn scratch_path(&self) -> Option<PathBuf> {
        lock(&self.scratch).as_ref().map(|dir| dir.path().to_path_buf())
    }

    /// Remove lingering files and the scratch directory. Failures here are
    /// ignored; the directory may already be partially gone.
    fn cleanup(&self) {
        let mut created = lock(&self.created_files);
        for path in created.drain(..) {
            let _ = std::fs::remove_file(&path);
        }
        drop(created);

        if let Some(dir) = lock(&self.scratch).take() {
            let _ = dir.close();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run_operations(
    dir: &Path,
    operations: u32,
    buffer: &[u8],
    completed: &AtomicU64,
    created: &Mutex<Vec<PathBuf>>,
    cancel: &CancellationToken,
) -> anyhow::Result<Outcome> {
    for index in 0..operations {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let path = dir.join(format!("test-file-{index}.dat"));

        std::fs::write(&path, buffer)
            .with_context(|| format!("failed to write {}", path.display()))?;
        lock(created).push(path.clone());
        completed.fetch_add(1, Ordering::Relaxed);

        std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        completed.fetch_add(1, Ordering::Relaxed);

        std::fs::remove_file(&path)
            .with_context(|| format!("failed to delete {}", path.display()))?;
        lock(created).retain(|p| p != &path);
        completed.fetch_add(1, Ordering::Relaxed);
    }
    Ok(Outcome::Completed)
}

#[async_trait]
impl LoadAction for DiskStorm {
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<Outcome> {
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .context("failed to create scratch directory")?;
        let dir = scratch.path().to_path_buf();
        *lock(&self.scratch) = Some(scratch);

        let mut buffer = vec![0u8; self.file_size_kb as usize * 1024];
        OsRng.fill_bytes(&mut buffer);

        let operations = self.operations;
        let completed = Arc::clone(&self.completed_substeps);
        let created = Arc::clone(&self.created_files);
        let worker_cancel = cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            run_operations(&dir, operations, &buffer, &completed, &created, &worker_cancel)
        })
        .await;

        self.cleanup();
        match result {
            Ok(outcome) => outcome,
            Err(join_error) => Err(join_error.into()),
        }
    }

    fn progress(&self) -> f64 {
        if self.total_substeps == 0 {
            return 0.0;
        }
        let done = self.completed_substeps.load(Ordering::Relaxed) as f64;
        (done / self.total_substeps as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_validates_operation_bounds() {
        assert!(DiskStorm::new(0, 10).is_err());
        assert!(DiskStorm::new(1, 10).is_ok());
        assert!(DiskStorm::new(10_000, 10).is_ok());
        assert!(DiskStorm::new(10_001, 10).is_err());
    }

    #[test]
    fn test_validates_file_size_bounds() {
        assert!(DiskStorm::new(10, 0).is_err());
        assert!(DiskStorm::new(10, 1).is_ok());
        assert!(DiskStorm::new(10, 1024).is_ok());
        assert!(DiskStorm::new(10, 1025).is_err());
    }

    #[test]
    fn test_footprint_cap_is_inclusive() {
        // 1024 * 100 KB is exactly 100 MiB.
        assert!(DiskStorm::new(1024, 100).is_ok());
        assert!(matches!(
            DiskStorm::new(1025, 100),
            Err(ValidationError::DiskFootprintExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_completes_all_substeps_and_removes_scratch() {
        let storm = Arc::new(DiskStorm::new(10, 10).expect("valid params"));
        let runner = {
            let storm = Arc::clone(&storm);
            tokio::spawn(async move { storm.execute(CancellationToken::new()).await })
        };

        // Capture the scratch path while the storm is running so its
        // removal can be asserted afterwards.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut observed_scratch = None;
        while observed_scratch.is_none() && Instant::now() < deadline && !runner.is_finished() {
            observed_scratch = storm.scratch_path();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let outcome = runner.await.expect("join").expect("execute");
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(storm.completed_substeps.load(Ordering::Relaxed), 30);
        assert_eq!(storm.progress(), 1.0);
        assert!(storm.scratch_path().is_none());
        if let Some(path) = observed_scratch {
            assert!(!path.exists(), "scratch directory should be removed");
        }
    }

    #[tokio::test]
    async fn test_cancellation_cleans_up_scratch() {
        let storm = DiskStorm::new(10_000, 10).expect("valid params");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = storm.execute(cancel).await.expect("execute");
        assert_eq!(outcome, Outcome::Cancelled);
        assert!(storm.scratch_path().is_none());
        assert!(lock(&storm.created_files).is_empty());
        assert!(storm.progress() < 1.0);
    }
}
