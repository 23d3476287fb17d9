//! Preconfirmation statistics.
//!
//! Each tracked transaction yields one [`PreconfObservation`]: whether the
//! node preconfirmed it (and how fast) and whether a receipt showed up. The
//! pair is classified into the counters below.

use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Receipts landing this many blocks after submission or later do not count
/// towards confidence.
const CONFIDENCE_BLOCK_WINDOW: u64 = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct PreconfObservation {
    /// Time to preconfirmation, `None` if it never came.
    pub preconf: Option<Duration>,
    /// Time to receipt and the block it landed in.
    pub receipt: Option<(Duration, u64)>,
    /// Head block when tracking started.
    pub start_block: Option<u64>,
}

#[derive(Debug, Default)]
pub struct PreconfTracker {
    total: AtomicU64,
    preconf_success: AtomicU64,
    preconf_fail: AtomicU64,
    both_failed: AtomicU64,
    ineffective: AtomicU64,
    false_positives: AtomicU64,
    confidence: AtomicU64,
    samples: Mutex<Samples>,
}

#[derive(Debug, Default)]
struct Samples {
    durations_ms: Vec<u64>,
    block_diffs: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconfReport {
    pub total_tasks: u64,
    pub preconf_success: u64,
    pub preconf_fail: u64,
    pub both_failed: u64,
    pub ineffective_preconf: u64,
    pub false_positives: u64,
    pub confidence: u64,
    pub preconf_durations_ms: Vec<u64>,
    pub block_diffs: Vec<u64>,
}

impl PreconfTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, observation: PreconfObservation) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match observation.preconf {
            Some(latency) => {
                self.preconf_success.fetch_add(1, Ordering::Relaxed);
                self.samples().durations_ms.push(latency.as_millis() as u64);
            }
            None => {
                self.preconf_fail.fetch_add(1, Ordering::Relaxed);
            }
        }

        match (observation.preconf, observation.receipt) {
            (None, None) => {
                self.both_failed.fetch_add(1, Ordering::Relaxed);
            }
            // Preconfirmed but never executed.
            (Some(_), None) => {
                self.false_positives.fetch_add(1, Ordering::Relaxed);
            }
            (None, Some(_)) => {
                self.ineffective.fetch_add(1, Ordering::Relaxed);
            }
            (Some(preconf), Some((receipt, block))) => {
                if preconf > receipt {
                    self.ineffective.fetch_add(1, Ordering::Relaxed);
                }
                if let Some(start) = observation.start_block {
                    let diff = block.saturating_sub(start);
                    if diff < CONFIDENCE_BLOCK_WINDOW {
                        self.samples().block_diffs.push(diff);
                        self.confidence.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    fn samples(&self) -> std::sync::MutexGuard<'_, Samples> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn report(&self) -> PreconfReport {
        let samples = self.samples();
        PreconfReport {
            total_tasks: self.total.load(Ordering::Relaxed),
            preconf_success: self.preconf_success.load(Ordering::Relaxed),
            preconf_fail: self.preconf_fail.load(Ordering::Relaxed),
            both_failed: self.both_failed.load(Ordering::Relaxed),
            ineffective_preconf: self.ineffective.load(Ordering::Relaxed),
            false_positives: self.false_positives.load(Ordering::Relaxed),
            confidence: self.confidence.load(Ordering::Relaxed),
            preconf_durations_ms: samples.durations_ms.clone(),
            block_diffs: samples.block_diffs.clone(),
        }
    }

    /// Logs the counters and, when `path` is given, writes the full report
    /// as JSON.
    pub async fn finish(&self, path: Option<&str>) -> anyhow::Result<PreconfReport> {
        let report = self.report();
        info!(
            total_tasks = report.total_tasks,
            preconf_success = report.preconf_success,
            preconf_fail = report.preconf_fail,
            both_failed = report.both_failed,
            ineffective_preconf = report.ineffective_preconf,
            false_positives = report.false_positives,
            confidence = report.confidence,
            "Preconf tracker stats"
        );
        if let Some(path) = path {
            let json = serde_json::to_string_pretty(&report)?;
            tokio::fs::write(path, json).await?;
            info!(path, "Wrote preconf stats");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_classification() {
        let tracker = PreconfTracker::new();
        // Fast preconf, receipt two blocks later.
        tracker.observe(PreconfObservation {
            preconf: Some(ms(50)),
            receipt: Some((ms(900), 12)),
            start_block: Some(10),
        });
        // Receipt beat the preconf.
        tracker.observe(PreconfObservation {
            preconf: Some(ms(2_000)),
            receipt: Some((ms(1_000), 40)),
            start_block: Some(10),
        });
        tracker.observe(PreconfObservation {
            preconf: Some(ms(80)),
            receipt: None,
            start_block: Some(10),
        });
        tracker.observe(PreconfObservation {
            preconf: None,
            receipt: Some((ms(500), 11)),
            start_block: Some(10),
        });
        tracker.observe(PreconfObservation::default());

        let report = tracker.report();
        assert_eq!(report.total_tasks, 5);
        assert_eq!(report.preconf_success, 3);
        assert_eq!(report.preconf_fail, 2);
        assert_eq!(report.both_failed, 1);
        assert_eq!(report.false_positives, 1);
        assert_eq!(report.ineffective_preconf, 2);
        assert_eq!(report.confidence, 1);
        assert_eq!(report.block_diffs, vec![2]);
        assert_eq!(report.preconf_durations_ms, vec![50, 2_000, 80]);
    }

    #[tokio::test]
    async fn test_finish_writes_json() {
        let tracker = PreconfTracker::new();
        tracker.observe(PreconfObservation {
            preconf: Some(ms(10)),
            receipt: Some((ms(20), 1)),
            start_block: Some(1),
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preconf.json");
        tracker.finish(path.to_str()).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["totalTasks"], 1);
        assert_eq!(json["confidence"], 1);
    }
}
