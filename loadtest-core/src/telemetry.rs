//! Per-request records and the end-of-run summary.
//!
//! Workers append one [`TxRecord`] per request. The receipt and preconf
//! trackers later merge their outcome into the record by transaction hash.
//! Aggregation only happens once all workers have exited.

use alloy_primitives::{Address, B256};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    #[default]
    None,
    Submit,
    Timeout,
    Receipt,
    Preconf,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::None => "none",
            ErrorClass::Submit => "submit",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Receipt => "receipt",
            ErrorClass::Preconf => "preconf",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiptStatus {
    #[default]
    Unknown,
    Success,
    Reverted,
    NotFound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconfStats {
    pub confirmed: bool,
    pub latency_ms: u64,
}

/// One request attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRecord {
    pub index: u64,
    pub mode: String,
    pub account: Address,
    pub nonce: u64,
    pub hash: Option<B256>,
    pub start_ts_ms: i64,
    pub end_ts_ms: i64,
    pub latency_ms: f64,
    pub error: Option<String>,
    pub error_class: ErrorClass,
    pub receipt_status: ReceiptStatus,
    pub gas_used: Option<u64>,
    pub block_number: Option<u64>,
    pub preconf: Option<PreconfStats>,
}

impl TxRecord {
    pub fn new(index: u64, mode: impl Into<String>, account: Address, nonce: u64) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            index,
            mode: mode.into(),
            account,
            nonce,
            hash: None,
            start_ts_ms: now,
            end_ts_ms: now,
            latency_ms: 0.0,
            error: None,
            error_class: ErrorClass::None,
            receipt_status: ReceiptStatus::Unknown,
            gas_used: None,
            block_number: None,
            preconf: None,
        }
    }

    /// Stamps the end of the call with its wall-clock latency.
    pub fn finish(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_secs_f64() * 1_000.0;
        self.end_ts_ms = self.start_ts_ms + latency.as_millis() as i64;
        self
    }

    pub fn with_hash(mut self, hash: B256) -> Self {
        self.hash = Some(hash);
        self
    }

    pub fn with_error(mut self, class: ErrorClass, error: impl Into<String>) -> Self {
        self.error_class = class;
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.error_class == ErrorClass::None && self.receipt_status != ReceiptStatus::Reverted
    }
}

/// Append-only record buffer shared by all workers.
#[derive(Debug, Default)]
pub struct Telemetry {
    inner: Mutex<Records>,
}

#[derive(Debug, Default)]
struct Records {
    records: Vec<TxRecord>,
    by_hash: HashMap<B256, usize>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Records> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, record: TxRecord) {
        let mut inner = self.lock();
        let position = inner.records.len();
        if let Some(hash) = record.hash {
            inner.by_hash.insert(hash, position);
        }
        inner.records.push(record);
    }

    /// Merges a receipt outcome into the record with `hash`. Returns false
    /// when no such record exists.
    pub fn update_receipt(
        &self,
        hash: &B256,
        status: ReceiptStatus,
        gas_used: Option<u64>,
        block_number: Option<u64>,
    ) -> bool {
        let mut inner = self.lock();
        let Some(position) = inner.by_hash.get(hash).copied() else {
            return false;
        };
        let record = &mut inner.records[position];
        record.receipt_status = status;
        record.gas_used = gas_used;
        record.block_number = block_number;
        match status {
            ReceiptStatus::Reverted if record.error_class == ErrorClass::None => {
                record.error_class = ErrorClass::Receipt;
                record.error = Some("transaction reverted".to_string());
            }
            ReceiptStatus::NotFound if record.error_class == ErrorClass::None => {
                record.error_class = ErrorClass::Timeout;
                record.error = Some("receipt not found before retries ran out".to_string());
            }
            _ => {}
        }
        true
    }

    pub fn update_preconf(&self, hash: &B256, stats: PreconfStats) -> bool {
        let mut inner = self.lock();
        let Some(position) = inner.by_hash.get(hash).copied() else {
            return false;
        };
        let record = &mut inner.records[position];
        record.preconf = Some(stats);
        if !stats.confirmed && record.error_class == ErrorClass::None {
            record.error_class = ErrorClass::Preconf;
            record.error = Some("preconfirmation not observed".to_string());
        }
        true
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<TxRecord> {
        self.lock().records.clone()
    }

    pub fn summary(&self, duration: Duration) -> TelemetrySummary {
        TelemetrySummary::from_records(&self.lock().records, duration)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    pub mean: f64,
    pub median: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

impl LatencyStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };

        Self {
            mean,
            median,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
            min: sorted[0],
            max: sorted[n - 1],
            stddev: variance.sqrt(),
        }
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeSummary {
    pub count: u64,
    pub errors: u64,
    pub latency: LatencyStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySummary {
    pub count: u64,
    pub successful: u64,
    pub errors: u64,
    pub errors_by_class: BTreeMap<ErrorClass, u64>,
    pub receipts: BTreeMap<ReceiptStatus, u64>,
    pub latency_ms: LatencyStats,
    pub per_mode: BTreeMap<String, ModeSummary>,
    pub duration_secs: f64,
    pub requests_per_sec: f64,
    pub successful_per_sec: f64,
}

impl TelemetrySummary {
    pub fn from_records(records: &[TxRecord], duration: Duration) -> Self {
        let mut summary = TelemetrySummary {
            count: records.len() as u64,
            duration_secs: duration.as_secs_f64(),
            ..Default::default()
        };

        let mut latencies = Vec::with_capacity(records.len());
        let mut mode_latencies: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

        for record in records {
            latencies.push(record.latency_ms);
            mode_latencies
                .entry(record.mode.as_str())
                .or_default()
                .push(record.latency_ms);

            let mode = summary.per_mode.entry(record.mode.clone()).or_default();
            mode.count += 1;

            if record.is_success() {
                summary.successful += 1;
            } else {
                summary.errors += 1;
                mode.errors += 1;
                *summary.errors_by_class.entry(record.error_class).or_default() += 1;
            }
            if record.receipt_status != ReceiptStatus::Unknown {
                *summary.receipts.entry(record.receipt_status).or_default() += 1;
            }
        }

        summary.latency_ms = LatencyStats::from_samples(&latencies);
        for (mode, samples) in mode_latencies {
            if let Some(entry) = summary.per_mode.get_mut(mode) {
                entry.latency = LatencyStats::from_samples(&samples);
            }
        }

        if summary.duration_secs > 0.0 {
            summary.requests_per_sec = summary.count as f64 / summary.duration_secs;
            summary.successful_per_sec = summary.successful as f64 / summary.duration_secs;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u64, mode: &str, latency_ms: u64) -> TxRecord {
        TxRecord::new(index, mode, Address::ZERO, index)
            .finish(Duration::from_millis(latency_ms))
            .with_hash(B256::with_last_byte(index as u8 + 1))
    }

    #[test]
    fn test_percentiles_nearest_rank() {
        let samples: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        let stats = LatencyStats::from_samples(&samples);
        assert_eq!(stats.p50, 50.0);
        assert_eq!(stats.p95, 95.0);
        assert_eq!(stats.p99, 99.0);
        assert_eq!(stats.median, 50.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
    }

    #[test]
    fn test_empty_summary() {
        let telemetry = Telemetry::new();
        let summary = telemetry.summary(Duration::from_secs(1));
        assert_eq!(summary.count, 0);
        assert_eq!(summary.latency_ms, LatencyStats::default());
    }

    #[test]
    fn test_receipt_merge_by_hash() {
        let telemetry = Telemetry::new();
        telemetry.record(record(0, "transaction", 10));
        telemetry.record(record(1, "transaction", 20));

        let hash = B256::with_last_byte(2);
        assert!(telemetry.update_receipt(&hash, ReceiptStatus::Reverted, Some(21_000), Some(7)));
        assert!(!telemetry.update_receipt(&B256::ZERO, ReceiptStatus::Success, None, None));

        let records = telemetry.records();
        assert_eq!(records[1].receipt_status, ReceiptStatus::Reverted);
        assert_eq!(records[1].error_class, ErrorClass::Receipt);
        assert_eq!(records[0].receipt_status, ReceiptStatus::Unknown);
    }

    #[test]
    fn test_summary_counts_and_modes() {
        let telemetry = Telemetry::new();
        telemetry.record(record(0, "transaction", 10));
        telemetry.record(record(1, "store", 30));
        telemetry.record(record(2, "store", 50).with_error(ErrorClass::Submit, "nonce too low"));

        let summary = telemetry.summary(Duration::from_secs(2));
        assert_eq!(summary.count, 3);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.errors_by_class.get(&ErrorClass::Submit), Some(&1));
        assert_eq!(summary.per_mode["store"].count, 2);
        assert_eq!(summary.per_mode["store"].errors, 1);
        assert_eq!(summary.per_mode["store"].latency.mean, 40.0);
        assert_eq!(summary.requests_per_sec, 1.5);
        assert_eq!(summary.successful_per_sec, 1.0);

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"perMode\""));
        assert!(json.contains("\"submit\""));
    }
}
