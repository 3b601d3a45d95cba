//! Action supervision: admission control, lifecycle state machine,
//! safety monitoring, forced shutdown and retention.
//!
//! Each admitted action gets a dedicated worker task running the
//! experiment and a paired safety watcher. Termination flows through one
//! cancellation token per action, whether it was requested by an operator,
//! forced by the safety watcher or never needed at all.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actions::{LoadAction, Outcome};
use crate::error::SupervisorError;
use crate::models::{Action, ActionStatus, ActionType};
use crate::sampler::MetricsSource;

// Safety limits enforced at admission and by the per-action watcher.
pub const MAX_CPU_PERCENT: f64 = 95.0;
pub const MAX_MEMORY_PERCENT: f64 = 25.0;
pub const MAX_CONCURRENT: usize = 5;

// Critical thresholds: the watcher force-stops its action at these levels.
pub const CRITICAL_CPU: f64 = 98.0;
pub const CRITICAL_MEMORY: f64 = 95.0;

// Load-headroom offsets applied at admission. The memory offset really is
// +50: admission rejects only above 75%.
const ADMISSION_CPU_LIMIT: f64 = MAX_CPU_PERCENT - 10.0;
const ADMISSION_MEMORY_LIMIT: f64 = MAX_MEMORY_PERCENT + 50.0;

const WATCHER_TICK: Duration = Duration::from_millis(500);
const RETENTION: Duration = Duration::from_secs(60);

/// Timing and capacity knobs. Defaults are the production values; tests
/// construct faster supervisors through [`Supervisor::with_config`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Maximum number of live actions.
    pub max_concurrent: usize,
    /// Safety watcher wake period.
    pub watcher_tick: Duration,
    /// How long terminal actions stay queryable before `sweep` drops them.
    pub retention: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT,
            watcher_tick: WATCHER_TICK,
            retention: RETENTION,
        }
    }
}

struct ActionEntry {
    record: Action,
    instance: Arc<dyn LoadAction>,
    cancel: CancellationToken,
}

/// Central registry of load actions. The sole process-wide aggregate;
/// everything it spawns is keyed by action id and looked up under the
/// registry lock rather than held as back references.
pub struct Supervisor {
    registry: RwLock<HashMap<String, ActionEntry>>,
    metrics: Arc<dyn MetricsSource>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(metrics: Arc<dyn MetricsSource>) -> Arc<Self> {
        Self::with_config(metrics, SupervisorConfig::default())
    }

    pub fn with_config(metrics: Arc<dyn MetricsSource>, config: SupervisorConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(HashMap::new()),
            metrics,
            config,
        })
    }

    /// Admit and launch a new action.
    ///
    /// Admission happens under the registry lock: the live-action count
    /// must be below the cap and the freshest metrics snapshot must leave
    /// headroom below the safety limits. On success the returned record is
    /// already `running`.
    pub async fn start(
        self: &Arc<Self>,
        action_type: ActionType,
        instance: Arc<dyn LoadAction>,
    ) -> Result<Action, SupervisorError> {
        let mut registry = self.registry.write().await;

        let live = registry
            .values()
            .filter(|entry| entry.record.status.is_live())
            .count();
        if live >= self.config.max_concurrent {
            return Err(SupervisorError::MaxConcurrentReached);
        }

        let snapshot = self.metrics.current();
        if snapshot.cpu_percent > ADMISSION_CPU_LIMIT {
            return Err(SupervisorError::CpuLimitExceeded {
                current: snapshot.cpu_percent,
            });
        }
        if snapshot.memory_percent > ADMISSION_MEMORY_LIMIT {
            return Err(SupervisorError::MemoryLimitExceeded {
                current: snapshot.memory_percent,
            });
        }

        let id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let mut record = Action {
            id: id.clone(),
            action_type,
            status: ActionStatus::Starting,
            started_at: Utc::now(),
            completed_at: None,
            progress: 0.0,
            error: None,
        };

        registry.insert(
            id.clone(),
            ActionEntry {
                record: record.clone(),
                instance: Arc::clone(&instance),
                cancel: cancel.clone(),
            },
        );

        self.spawn_worker(id.clone(), instance, cancel.clone());
        self.spawn_watcher(id.clone(), cancel);

        // Still inside the admission critical section: the record becomes
        // observable as `running` before any progress can be published.
        if let Some(entry) = registry.get_mut(&id) {
            entry.record.status = ActionStatus::Running;
        }
        record.status = ActionStatus::Running;

        info!("Action {} admitted ({})", id, action_type.as_str());
        Ok(record)
    }

    /// Fire the cancellation signal for an action. Does not wait for the
    /// worker to wind down. Stopping an already-terminal action is a no-op.
    pub async fn stop(&self, id: &str) -> Result<(), SupervisorError> {
        let registry = self.registry.read().await;
        let entry = registry.get(id).ok_or(SupervisorError::ActionNotFound)?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Snapshot of one action record.
    pub async fn get(&self, id: &str) -> Result<Action, SupervisorError> {
        let registry = self.registry.read().await;
        registry
            .get(id)
            .map(|entry| entry.record.clone())
            .ok_or(SupervisorError::ActionNotFound)
    }

    /// All records currently counting against the concurrency cap.
    pub async fn active(&self) -> Vec<Action> {
        let registry = self.registry.read().await;
        registry
            .values()
            .filter(|entry| entry.record.status.is_live())
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Fire cancellation for every live action; returns how many were
    /// signalled.
    pub async fn stop_all(&self) -> usize {
        let registry = self.registry.read().await;
        let mut count = 0;
        for entry in registry.values() {
            if entry.record.status.is_live() {
                entry.cancel.cancel();
                count += 1;
            }
        }
        if count > 0 {
            info!("Stop-all signalled {} live actions", count);
        }
        count
    }

    /// Drop terminal records older than the retention window.
    pub async fn sweep(&self) {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let now = Utc::now();

        let mut registry = self.registry.write().await;
        registry.retain(|_, entry| {
            let expired = entry.record.status.is_terminal()
                && entry
                    .record
                    .completed_at
                    .is_some_and(|done| now - done > retention);
            !expired
        });
    }

    /// Spawn the periodic retention sweep.
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                supervisor.sweep().await;
            }
        })
    }

    /// Worker: runs the experiment and records the terminal transition.
    ///
    /// The experiment runs in its own task so that a panic inside it
    /// surfaces here as a join error and becomes a terminal `failed`
    /// record instead of tearing anything else down.
    fn spawn_worker(
        self: &Arc<Self>,
        id: String,
        instance: Arc<dyn LoadAction>,
        cancel: CancellationToken,
    ) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let execution = tokio::spawn({
                let cancel = cancel.clone();
                async move { instance.execute(cancel).await }
            });
            let result = execution.await;

            let mut registry = supervisor.registry.write().await;
            if let Some(entry) = registry.get_mut(&id) {
                entry.record.completed_at = Some(Utc::now());
                match result {
                    Ok(Ok(Outcome::Completed)) => {
                        entry.record.status = ActionStatus::Completed;
                        entry.record.progress = 1.0;
                        info!("Action {} completed", id);
                    }
                    Ok(Ok(Outcome::Cancelled)) => {
                        entry.record.status = ActionStatus::Stopped;
                        info!("Action {} stopped", id);
                    }
                    Ok(Err(err)) => {
                        entry.record.status = ActionStatus::Failed;
                        entry.record.error = Some(err.to_string());
                        warn!("Action {} failed: {}", id, err);
                    }
                    Err(join_error) => {
                        entry.record.status = ActionStatus::Failed;
                        entry.record.error = Some(if join_error.is_panic() {
                            "action panicked during execution".to_string()
                        } else {
                            join_error.to_string()
                        });
                        error!("Action {} crashed: {}", id, join_error);
                    }
                }
            }
            drop(registry);

            // Reap the paired watcher; after natural completion nothing
            // else ever fires this token.
            cancel.cancel();
        });
    }

    /// Safety watcher: one per action. Force-stops its action when the
    /// host crosses a critical threshold, otherwise publishes the
    /// experiment's progress into the record.
    fn spawn_watcher(self: &Arc<Self>, id: String, cancel: CancellationToken) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(supervisor.config.watcher_tick);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }

                let snapshot = supervisor.metrics.current();
                if snapshot.cpu_percent >= CRITICAL_CPU
                    || snapshot.memory_percent >= CRITICAL_MEMORY
                {
                    warn!(
                        "Critical host load (cpu {:.1}%, memory {:.1}%), forcing shutdown of action {}",
                        snapshot.cpu_percent, snapshot.memory_percent, id
                    );
                    let _ = supervisor.stop(&id).await;
                    return;
                }

                let mut registry = supervisor.registry.write().await;
                match registry.get_mut(&id) {
                    Some(entry) if !entry.record.status.is_terminal() => {
                        // 1.0 is reserved for the terminal completed
                        // transition written by the worker.
                        let progress = entry.instance.progress().clamp(0.0, 1.0);
                        if progress > entry.record.progress && progress < 1.0 {
                            entry.record.progress = progress;
                        }
                    }
                    _ => return,
                }
            }
        });
    }
}
