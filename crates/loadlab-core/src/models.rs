// Core data model shared by the supervisor, the experiments and the API facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    CpuStress,
    MemorySurge,
    DiskStorm,
    TrafficFlood,
}

impl ActionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cpu-stress" => Some(Self::CpuStress),
            "memory-surge" => Some(Self::MemorySurge),
            "disk-storm" => Some(Self::DiskStorm),
            "traffic-flood" => Some(Self::TrafficFlood),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuStress => "cpu-stress",
            Self::MemorySurge => "memory-surge",
            Self::DiskStorm => "disk-storm",
            Self::TrafficFlood => "traffic-flood",
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ActionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// An action counts against the concurrency cap while it is live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}

/// One load-injection run, owned by the supervisor.
///
/// `progress` is in [0, 1] and non-decreasing; it reaches 1.0 only on
/// natural completion. `completed_at` and `error` are set exactly when the
/// action becomes terminal (`error` only for `failed`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Immutable host metrics reading, replaced atomically by the sampler.
/// All four readings are clamped non-negative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "cpu")]
    pub cpu_percent: f64,
    #[serde(rename = "memory")]
    pub memory_percent: f64,
    #[serde(rename = "disk_io")]
    pub disk_ops_per_sec: f64,
    #[serde(rename = "network")]
    pub network_mb_per_sec: f64,
}

impl MetricsSnapshot {
    /// All-zero snapshot stamped with the current time; what readers see
    /// before the first sample lands.
    pub fn zeroed() -> Self {
        Self {
            timestamp: Utc::now(),
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_ops_per_sec: 0.0,
            network_mb_per_sec: 0.0,
        }
    }
}
