use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use loadlab_core::actions::{LoadAction, Outcome};
use loadlab_core::models::{ActionStatus, ActionType, MetricsSnapshot};
use loadlab_core::sampler::MetricsSource;
use loadlab_core::supervisor::{Supervisor, SupervisorConfig};
use loadlab_core::SupervisorError;

/// Metrics source with operator-adjustable readings, so admission gates
/// and critical thresholds can be exercised deterministically.
struct AdjustableMetrics {
    cpu_tenths: AtomicU64,
    memory_tenths: AtomicU64,
}

impl AdjustableMetrics {
    fn new(cpu: f64, memory: f64) -> Arc<Self> {
        Arc::new(Self {
            cpu_tenths: AtomicU64::new((cpu * 10.0) as u64),
            memory_tenths: AtomicU64::new((memory * 10.0) as u64),
        })
    }

    fn set_cpu(&self, cpu: f64) {
        self.cpu_tenths.store((cpu * 10.0) as u64, Ordering::SeqCst);
    }

    fn set_memory(&self, memory: f64) {
        self.memory_tenths
            .store((memory * 10.0) as u64, Ordering::SeqCst);
    }
}

impl MetricsSource for AdjustableMetrics {
    fn current(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: chrono::Utc::now(),
            cpu_percent: self.cpu_tenths.load(Ordering::SeqCst) as f64 / 10.0,
            memory_percent: self.memory_tenths.load(Ordering::SeqCst) as f64 / 10.0,
            disk_ops_per_sec: 0.0,
            network_mb_per_sec: 0.0,
        }
    }
}

fn healthy_metrics() -> Arc<AdjustableMetrics> {
    AdjustableMetrics::new(10.0, 40.0)
}

fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        max_concurrent: 5,
        watcher_tick: Duration::from_millis(20),
        retention: Duration::from_millis(200),
    }
}

struct MockAction {
    duration: Duration,
    fail: bool,
    reported_progress: f64,
}

impl MockAction {
    fn finishing_in(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            fail: false,
            reported_progress: 0.5,
        })
    }

    fn failing_after(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            fail: true,
            reported_progress: 0.5,
        })
    }
}

#[async_trait]
impl LoadAction for MockAction {
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<Outcome> {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
            _ = sleep(self.duration) => {}
        }
        if self.fail {
            anyhow::bail!("mock failure")
        }
        Ok(Outcome::Completed)
    }

    fn progress(&self) -> f64 {
        self.reported_progress
    }
}

struct PanickingAction;

#[async_trait]
impl LoadAction for PanickingAction {
    async fn execute(&self, _cancel: CancellationToken) -> anyhow::Result<Outcome> {
        sleep(Duration::from_millis(10)).await;
        panic!("boom");
    }

    fn progress(&self) -> f64 {
        0.0
    }
}

/// Poll until the record reaches a terminal status or the deadline passes.
async fn wait_for_terminal(
    supervisor: &Arc<Supervisor>,
    id: &str,
    deadline: Duration,
) -> loadlab_core::Action {
    let end = Instant::now() + deadline;
    loop {
        let action = supervisor.get(id).await.expect("record retained");
        if action.status.is_terminal() {
            return action;
        }
        assert!(
            Instant::now() < end,
            "action {id} did not reach a terminal state in {deadline:?}"
        );
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_start_returns_running_record() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let action = supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_millis(50)),
        )
        .await
        .expect("admitted");

    assert!(uuid::Uuid::parse_str(&action.id).is_ok());
    assert_eq!(action.action_type, ActionType::CpuStress);
    assert_eq!(action.status, ActionStatus::Running);
    assert_eq!(action.progress, 0.0);
    assert!(action.completed_at.is_none());
}

#[tokio::test]
async fn test_natural_completion_sets_progress_one() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let action = supervisor
        .start(
            ActionType::MemorySurge,
            MockAction::finishing_in(Duration::from_millis(50)),
        )
        .await
        .expect("admitted");

    let done = wait_for_terminal(&supervisor, &action.id, Duration::from_secs(2)).await;
    assert_eq!(done.status, ActionStatus::Completed);
    assert_eq!(done.progress, 1.0);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_watcher_publishes_instance_progress() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let action = supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_secs(5)),
        )
        .await
        .expect("admitted");

    sleep(Duration::from_millis(100)).await;
    let running = supervisor.get(&action.id).await.expect("record");
    assert_eq!(running.status, ActionStatus::Running);
    assert_eq!(running.progress, 0.5);

    supervisor.stop(&action.id).await.expect("stop");
    let stopped = wait_for_terminal(&supervisor, &action.id, Duration::from_secs(1)).await;
    assert_eq!(stopped.status, ActionStatus::Stopped);
    assert!(stopped.progress < 1.0);
}

#[tokio::test]
async fn test_stop_cancels_within_one_second() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let action = supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_secs(30)),
        )
        .await
        .expect("admitted");

    sleep(Duration::from_millis(50)).await;
    let stop_requested = Instant::now();
    supervisor.stop(&action.id).await.expect("stop");

    let stopped = wait_for_terminal(&supervisor, &action.id, Duration::from_secs(1)).await;
    assert!(stop_requested.elapsed() <= Duration::from_secs(1));
    assert_eq!(stopped.status, ActionStatus::Stopped);
    assert!(stopped.completed_at.is_some());
    assert!((0.0..1.0).contains(&stopped.progress));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let action = supervisor
        .start(
            ActionType::DiskStorm,
            MockAction::finishing_in(Duration::from_secs(30)),
        )
        .await
        .expect("admitted");

    supervisor.stop(&action.id).await.expect("first stop");
    supervisor.stop(&action.id).await.expect("second stop");

    let stopped = wait_for_terminal(&supervisor, &action.id, Duration::from_secs(1)).await;
    assert_eq!(stopped.status, ActionStatus::Stopped);

    // Stopping a terminal-but-retained action is still ok.
    supervisor.stop(&action.id).await.expect("stop after terminal");
}

#[tokio::test]
async fn test_stop_and_get_unknown_action() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    assert_eq!(
        supervisor.stop("no-such-id").await,
        Err(SupervisorError::ActionNotFound)
    );
    assert!(matches!(
        supervisor.get("no-such-id").await,
        Err(SupervisorError::ActionNotFound)
    ));
}

#[tokio::test]
async fn test_admission_cap_rejects_sixth_action() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    for _ in 0..5 {
        supervisor
            .start(
                ActionType::CpuStress,
                MockAction::finishing_in(Duration::from_secs(30)),
            )
            .await
            .expect("admitted below the cap");
    }

    let rejected = supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_secs(30)),
        )
        .await;
    assert_eq!(rejected.unwrap_err(), SupervisorError::MaxConcurrentReached);

    assert_eq!(supervisor.active().await.len(), 5);
    assert_eq!(supervisor.stop_all().await, 5);
}

#[tokio::test]
async fn test_terminal_actions_free_capacity() {
    let mut config = test_config();
    config.max_concurrent = 1;
    let supervisor = Supervisor::with_config(healthy_metrics(), config);

    let first = supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_millis(20)),
        )
        .await
        .expect("admitted");
    wait_for_terminal(&supervisor, &first.id, Duration::from_secs(2)).await;

    // The finished action is still retained but no longer counts.
    supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_millis(20)),
        )
        .await
        .expect("capacity freed by terminal action");
}

#[tokio::test]
async fn test_admission_rejects_high_cpu() {
    let metrics = healthy_metrics();
    let supervisor = Supervisor::with_config(metrics.clone(), test_config());

    metrics.set_cpu(85.0);
    supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_millis(20)),
        )
        .await
        .expect("85.0% is within headroom");

    metrics.set_cpu(90.0);
    let rejected = supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_millis(20)),
        )
        .await;
    assert!(matches!(
        rejected,
        Err(SupervisorError::CpuLimitExceeded { .. })
    ));
}

#[tokio::test]
async fn test_admission_rejects_high_memory() {
    let metrics = healthy_metrics();
    let supervisor = Supervisor::with_config(metrics.clone(), test_config());

    metrics.set_memory(75.0);
    supervisor
        .start(
            ActionType::MemorySurge,
            MockAction::finishing_in(Duration::from_millis(20)),
        )
        .await
        .expect("75.0% is within headroom");

    metrics.set_memory(80.0);
    let rejected = supervisor
        .start(
            ActionType::MemorySurge,
            MockAction::finishing_in(Duration::from_millis(20)),
        )
        .await;
    assert!(matches!(
        rejected,
        Err(SupervisorError::MemoryLimitExceeded { .. })
    ));
}

#[tokio::test]
async fn test_critical_cpu_forces_stopped_not_failed() {
    let metrics = healthy_metrics();
    let supervisor = Supervisor::with_config(metrics.clone(), test_config());

    let action = supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_secs(30)),
        )
        .await
        .expect("admitted");

    metrics.set_cpu(99.0);
    let forced = wait_for_terminal(&supervisor, &action.id, Duration::from_secs(1)).await;
    assert_eq!(forced.status, ActionStatus::Stopped);
    assert!(forced.error.is_none());
}

#[tokio::test]
async fn test_critical_memory_forces_stopped() {
    let metrics = healthy_metrics();
    let supervisor = Supervisor::with_config(metrics.clone(), test_config());

    let action = supervisor
        .start(
            ActionType::MemorySurge,
            MockAction::finishing_in(Duration::from_secs(30)),
        )
        .await
        .expect("admitted");

    metrics.set_memory(95.0);
    let forced = wait_for_terminal(&supervisor, &action.id, Duration::from_secs(1)).await;
    assert_eq!(forced.status, ActionStatus::Stopped);
}

#[tokio::test]
async fn test_failed_action_records_error() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let action = supervisor
        .start(
            ActionType::DiskStorm,
            MockAction::failing_after(Duration::from_millis(20)),
        )
        .await
        .expect("admitted");

    let failed = wait_for_terminal(&supervisor, &action.id, Duration::from_secs(2)).await;
    assert_eq!(failed.status, ActionStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("mock failure"));
    assert!(failed.completed_at.is_some());
}

#[tokio::test]
async fn test_panicking_action_maps_to_failed() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let action = supervisor
        .start(ActionType::CpuStress, Arc::new(PanickingAction))
        .await
        .expect("admitted");

    let failed = wait_for_terminal(&supervisor, &action.id, Duration::from_secs(2)).await;
    assert_eq!(failed.status, ActionStatus::Failed);
    assert!(failed
        .error
        .as_deref()
        .is_some_and(|msg| msg.contains("panicked")));
}

#[tokio::test]
async fn test_stop_immediately_after_start() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let action = supervisor
        .start(
            ActionType::TrafficFlood,
            MockAction::finishing_in(Duration::from_secs(30)),
        )
        .await
        .expect("admitted");
    supervisor.stop(&action.id).await.expect("stop");

    let stopped = wait_for_terminal(&supervisor, &action.id, Duration::from_secs(1)).await;
    assert_eq!(stopped.status, ActionStatus::Stopped);
    assert!((0.0..1.0).contains(&stopped.progress));
}

#[tokio::test]
async fn test_active_lists_only_live_actions() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let short = supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_millis(20)),
        )
        .await
        .expect("admitted");
    let long = supervisor
        .start(
            ActionType::MemorySurge,
            MockAction::finishing_in(Duration::from_secs(30)),
        )
        .await
        .expect("admitted");

    wait_for_terminal(&supervisor, &short.id, Duration::from_secs(2)).await;

    let active = supervisor.active().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, long.id);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_sweep_honors_retention_window() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let action = supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_millis(20)),
        )
        .await
        .expect("admitted");
    wait_for_terminal(&supervisor, &action.id, Duration::from_secs(2)).await;

    // Inside the retention window the record survives a sweep.
    supervisor.sweep().await;
    supervisor.get(&action.id).await.expect("still retained");

    sleep(Duration::from_millis(300)).await;
    supervisor.sweep().await;
    assert!(matches!(
        supervisor.get(&action.id).await,
        Err(SupervisorError::ActionNotFound)
    ));
}

#[tokio::test]
async fn test_sweep_never_drops_live_actions() {
    let supervisor = Supervisor::with_config(healthy_metrics(), test_config());

    let action = supervisor
        .start(
            ActionType::CpuStress,
            MockAction::finishing_in(Duration::from_secs(30)),
        )
        .await
        .expect("admitted");

    sleep(Duration::from_millis(250)).await;
    supervisor.sweep().await;
    supervisor.get(&action.id).await.expect("live action retained");

    supervisor.stop_all().await;
}
