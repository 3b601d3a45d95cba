use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::actions::{check_range, LoadAction, Outcome, TimedProgress};
use crate::error::ValidationError;

pub const MAX_REQUESTS_PER_SEC: u64 = 1000;
pub const MAX_DURATION_SECS: u64 = 60;

const MAX_IN_FLIGHT: u32 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TARGET_URL: &str = "http://localhost:8080/api/dummy";

/// Generates network load with paced HTTP GETs against a target URL.
///
/// Requests are spaced at `1 / requests_per_sec` with at most 50 in
/// flight. The point is traffic, not answers: response bodies are
/// discarded and request-level errors are absorbed, so the completed
/// counter includes failed requests. All in-flight requests are drained
/// before `execute` returns.
pub struct TrafficFlood {
    requests_per_sec: u32,
    duration: Duration,
    target_url: String,
    progress: TimedProgress,
    completed_requests: Arc<AtomicU64>,
}

impl TrafficFlood {
    pub fn new(
        requests_per_sec: u32,
        duration_seconds: u64,
        target_url: Option<String>,
    ) -> Result<Self, ValidationError> {
        check_range(
            "requests_per_sec",
            1,
            MAX_REQUESTS_PER_SEC,
            u64::from(requests_per_sec),
        )?;
        check_range("duration_seconds", 1, MAX_DURATION_SECS, duration_seconds)?;

        let duration = Duration::from_secs(duration_seconds);
        let target_url = target_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_TARGET_URL.to_string());

        Ok(Self {
            requests_per_sec,
            duration,
            target_url,
            progress: TimedProgress::new(duration),
            completed_requests: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Requests finished so far. Failed requests count too; the traffic
    /// was still generated.
    pub fn completed_requests(&self) -> u64 {
        self.completed_requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LoadAction for TrafficFlood {
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<Outcome> {
        let started = self.progress.begin();
        let end = started + self.duration;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()
            .context("failed to build http client")?;

        let pace = Duration::from_secs_f64(1.0 / f64::from(self.requests_per_sec));
        let mut tick = tokio::time::interval(pace);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let in_flight = Arc::new(Semaphore::new(MAX_IN_FLIGHT as usize));
        let mut cancelled = false;

        'pacing: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break 'pacing;
                }
                _ = tick.tick() => {}
            }
            if Instant::now() >= end {
                break;
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break 'pacing;
                }
                permit = Arc::clone(&in_flight).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let client = client.clone();
            let url = self.target_url.clone();
            let counter = Arc::clone(&self.completed_requests);
            let request_cancel = cancel.clone();
            tokio::spawn(async move {
                let _permit = permit;
                tokio::select! {
                    _ = request_cancel.cancelled() => {}
                    _ = async {
                        match client.get(&url).send().await {
                            // Drain the body so the request actually completes.
                            Ok(response) => {
                                let _ = response.bytes().await;
                            }
                            // Traffic is the goal; a refused or failed
                            // request still generated it.
                            Err(_) => {}
                        }
                    } => {}
                }
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        // Drain every in-flight request before reporting the outcome.
        let _drained = in_flight.acquire_many(MAX_IN_FLIGHT).await;

        if cancelled {
            Ok(Outcome::Cancelled)
        } else {
            Ok(Outcome::Completed)
        }
    }

    fn progress(&self) -> f64 {
        self.progress.value()
    }
}
