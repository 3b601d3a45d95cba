//! Host metrics sampling.
//!
//! The sampler keeps a single most-recent [`MetricsSnapshot`] and refreshes
//! it on a fixed period. CPU% comes from differencing kernel CPU-time
//! counters between consecutive refreshes; disk-ops/s and network-MB/s are
//! computed as `(count2 - count1) / dt` against the previous sample's
//! cumulative counters and report 0 on the first sample. A failed read of
//! any one source keeps that field at its last known good value; the
//! sampler itself never fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::Utc;
use sysinfo::{Networks, System};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::models::MetricsSnapshot;

/// Read access to the freshest host metrics.
///
/// Implementations must be cheap, safe under arbitrary concurrent callers
/// and must never hand out a partially updated snapshot.
pub trait MetricsSource: Send + Sync {
    fn current(&self) -> MetricsSnapshot;
}

/// Periodic host sampler publishing snapshots through an atomic swap, so
/// readers never block the sampling task.
pub struct Sampler {
    snapshot: ArcSwap<MetricsSnapshot>,
    started: AtomicBool,
}

impl Sampler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshot: ArcSwap::from_pointee(MetricsSnapshot::zeroed()),
            started: AtomicBool::new(false),
        })
    }

    /// Begin background sampling at `period`. The first sample is taken
    /// immediately. Idempotent: only the first call spawns the task.
    pub fn start(self: &Arc<Self>, period: Duration) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return None;
        }

        let sampler = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut collector = Collector::new();
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let snapshot = collector.collect();
                sampler.snapshot.store(Arc::new(snapshot));
            }
        }))
    }
}

impl MetricsSource for Sampler {
    fn current(&self) -> MetricsSnapshot {
        *self.snapshot.load_full()
    }
}

/// Mutable sampling state: OS handles plus the previous cumulative counters
/// used for rate calculations.
struct Collector {
    system: System,
    prev_at: Instant,
    prev_disk_ops: Option<u64>,
    prev_net_bytes: Option<u64>,
    last: MetricsSnapshot,
}

impl Collector {
    fn new() -> Self {
        Self {
            system: System::new(),
            prev_at: Instant::now(),
            prev_disk_ops: None,
            prev_net_bytes: None,
            last: MetricsSnapshot::zeroed(),
        }
    }

    fn collect(&mut self) -> MetricsSnapshot {
        let now = Instant::now();
        let dt = now.duration_since(self.prev_at).as_secs_f64();

        let mut snapshot = self.last;
        snapshot.timestamp = Utc::now();

        self.system.refresh_cpu_usage();
        let cpu = f64::from(self.system.global_cpu_usage());
        if cpu.is_finite() {
            snapshot.cpu_percent = cpu.max(0.0);
        }

        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total > 0 {
            let used = self.system.used_memory() as f64;
            snapshot.memory_percent = (used / total as f64 * 100.0).max(0.0);
        }

        match read_disk_ops() {
            Some(ops) => {
                if let Some(prev) = self.prev_disk_ops {
                    if dt > 0.0 {
                        snapshot.disk_ops_per_sec =
                            (ops.saturating_sub(prev) as f64 / dt).max(0.0);
                    }
                }
                self.prev_disk_ops = Some(ops);
            }
            None => debug!("disk counters unavailable, keeping last reading"),
        }

        let networks = Networks::new_with_refreshed_list();
        let bytes = total_network_bytes(&networks);
        if let Some(prev) = self.prev_net_bytes {
            if dt > 0.0 {
                let delta = bytes.saturating_sub(prev) as f64;
                snapshot.network_mb_per_sec = (delta / dt / (1024.0 * 1024.0)).max(0.0);
            }
        }
        self.prev_net_bytes = Some(bytes);

        self.prev_at = now;
        self.last = snapshot;
        snapshot
    }
}

/// Cumulative bytes sent plus received across all interfaces.
fn total_network_bytes(networks: &Networks) -> u64 {
    networks
        .iter()
        .map(|(_, data)| data.total_received().saturating_add(data.total_transmitted()))
        .fold(0u64, u64::saturating_add)
}

/// Cumulative completed read + write operations across physical disks.
#[cfg(target_os = "linux")]
fn read_disk_ops() -> Option<u64> {
    let raw = std::fs::read_to_string("/proc/diskstats").ok()?;
    let mut total: u64 = 0;
    let mut seen = false;
    for line in raw.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 || !is_physical_disk(parts[2]) {
            continue;
        }
        // Fields 4 and 8: reads completed, writes completed.
        let reads: u64 = match parts[3].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let writes: u64 = match parts[7].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        total = total.saturating_add(reads).saturating_add(writes);
        seen = true;
    }
    seen.then_some(total)
}

#[cfg(not(target_os = "linux"))]
fn read_disk_ops() -> Option<u64> {
    None
}

/// Whole block devices only; partitions and virtual devices would double
/// count the same I/O.
#[cfg(target_os = "linux")]
fn is_physical_disk(name: &str) -> bool {
    for prefix in ["loop", "ram", "zram", "dm-", "md", "sr"] {
        if name.starts_with(prefix) {
            return false;
        }
    }
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        // nvme0n1p2 / mmcblk0p1 are partitions, nvme0n1 / mmcblk0 are not.
        return !name.contains('p') || !name.chars().last().is_some_and(|c| c.is_ascii_digit());
    }
    // sda1 is a partition of sda, vdb2 of vdb.
    !name.chars().last().is_some_and(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_snapshot_is_all_zero() {
        let sampler = Sampler::new();
        let snapshot = sampler.current();
        assert_eq!(snapshot.cpu_percent, 0.0);
        assert_eq!(snapshot.memory_percent, 0.0);
        assert_eq!(snapshot.disk_ops_per_sec, 0.0);
        assert_eq!(snapshot.network_mb_per_sec, 0.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_physical_disk_filter() {
        for disk in ["sda", "vdb", "nvme0n1", "mmcblk0", "xvda"] {
            assert!(is_physical_disk(disk), "{disk} should count");
        }
        for other in ["sda1", "nvme0n1p2", "mmcblk0p1", "loop0", "ram0", "zram0", "dm-0", "md127", "sr0"] {
            assert!(!is_physical_disk(other), "{other} should not count");
        }
    }

    #[tokio::test]
    async fn test_collect_reports_sane_ranges() {
        let mut collector = Collector::new();
        let first = collector.collect();
        // Rates are defined as zero on the first sample.
        assert_eq!(first.disk_ops_per_sec, 0.0);
        assert_eq!(first.network_mb_per_sec, 0.0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = collector.collect();
        assert!(second.cpu_percent >= 0.0);
        assert!((0.0..=100.0).contains(&second.memory_percent));
        assert!(second.disk_ops_per_sec >= 0.0);
        assert!(second.network_mb_per_sec >= 0.0);
        assert!(second.timestamp >= first.timestamp);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let sampler = Sampler::new();
        let first = sampler.start(Duration::from_millis(100));
        let second = sampler.start(Duration::from_millis(100));
        assert!(first.is_some());
        assert!(second.is_none());
        if let Some(handle) = first {
            handle.abort();
        }
    }
}
