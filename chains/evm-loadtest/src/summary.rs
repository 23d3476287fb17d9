//! Run summaries
//!
//! - [`log_light_summary`] is always logged at the end of a run and only
//!   looks at the telemetry records.
//! - [`BlockSummary`] (`--summary`) walks the blocks between the start and
//!   the final block, keeps the transactions this run sent, and reports
//!   per-block gas and inclusion latency plus chain-level throughput.

use crate::account_pool::AccountPool;
use crate::client::EvmClient;
use alloy::consensus::Transaction as _;
use alloy::network::TransactionResponse;
use alloy::rpc::types::Block;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use loadtest_core::{LatencyStats, SummaryOutputMode, TelemetrySummary, TxRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::ops::Range;
use tracing::{debug, error, info, warn};

/// Logs the end-of-run numbers every run gets.
pub fn log_light_summary(summary: &TelemetrySummary, final_rate_limit: f64) {
    if summary.count == 0 {
        error!("No results recorded");
        return;
    }
    info!(samples = summary.count, "* Results");
    info!(
        tps = summary.successful_per_sec,
        "Successful requests per second"
    );
    if summary.successful_per_sec != summary.requests_per_sec {
        warn!(
            rps = summary.requests_per_sec,
            "Total requests per second (successful and failed)"
        );
    }
    let latency = &summary.latency_ms;
    info!(
        mean = latency.mean,
        median = latency.median,
        min = latency.min,
        max = latency.max,
        stddev = latency.stddev,
        "Request latency (ms)"
    );
    info!(
        duration_secs = summary.duration_secs,
        final_rate_limit, "Rough test summary"
    );
    info!(errors = summary.errors, "Num errors");
}

/// Nonce ranges and send times of this run's transactions.
#[derive(Debug, Default)]
pub struct SentTxs {
    ranges: HashMap<Address, Range<u64>>,
    sent_at_ms: HashMap<(Address, u64), i64>,
}

impl SentTxs {
    pub fn new(pool: &AccountPool, records: &[TxRecord]) -> Self {
        let ranges = pool
            .accounts()
            .iter()
            .map(|a| (a.address(), a.start_nonce()..a.next_nonce()))
            .collect();
        let sent_at_ms = records
            .iter()
            .map(|r| ((r.account, r.nonce), r.start_ts_ms))
            .collect();
        Self { ranges, sent_at_ms }
    }

    pub fn from_parts(
        ranges: impl IntoIterator<Item = (Address, Range<u64>)>,
        sent_at_ms: impl IntoIterator<Item = ((Address, u64), i64)>,
    ) -> Self {
        Self {
            ranges: ranges.into_iter().collect(),
            sent_at_ms: sent_at_ms.into_iter().collect(),
        }
    }

    pub fn contains(&self, from: Address, nonce: u64) -> bool {
        self.ranges
            .get(&from)
            .is_some_and(|range| range.contains(&nonce))
    }

    /// Seconds between sending and the block timestamp.
    fn inclusion_latency(&self, from: Address, nonce: u64, mined_at: u64) -> Option<f64> {
        let sent = *self.sent_at_ms.get(&(from, nonce))?;
        Some((mined_at as i64 * 1000 - sent) as f64 / 1000.0)
    }
}

/// The parts of a block the summary needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedBlock {
    pub number: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// `(sender, nonce)` of every transaction in the block.
    pub txs: Vec<(Address, u64)>,
}

impl MinedBlock {
    pub fn from_rpc(block: &Block) -> Self {
        Self {
            number: block.header.number,
            timestamp: block.header.timestamp,
            gas_limit: block.header.gas_limit,
            gas_used: block.header.gas_used,
            txs: block
                .transactions
                .txns()
                .map(|tx| (TransactionResponse::from(tx), tx.nonce()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyRange {
    pub min: f64,
    pub median: f64,
    pub max: f64,
}

impl From<LatencyStats> for LatencyRange {
    fn from(stats: LatencyStats) -> Self {
        Self {
            min: stats.min,
            median: stats.median,
            max: stats.max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStats {
    pub block_number: u64,
    pub time: DateTime<Utc>,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Transactions of this run in the block.
    pub num_tx: usize,
    pub total_tx: usize,
    pub utilization: f64,
    /// Inclusion latency in seconds.
    pub latencies: LatencyRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub summaries: Vec<BlockStats>,
    pub total_tx: u64,
    pub total_mining_time_secs: u64,
    pub total_gas_used: u64,
    pub transactions_per_sec: f64,
    pub gas_per_second: f64,
    pub latencies: LatencyRange,
    /// Seconds between consecutive blocks, `None` below two blocks.
    pub block_time: Option<LatencyStats>,
}

impl BlockSummary {
    /// Builds the summary from blocks in ascending order. Blocks before the
    /// first and after the last block carrying one of `sent` are dropped.
    /// `parent_timestamp` is the timestamp of the block before the first
    /// one. Returns `None` when no block carries a transaction of this run.
    pub fn from_blocks(
        blocks: &[MinedBlock],
        parent_timestamp: Option<u64>,
        sent: &SentTxs,
    ) -> Option<Self> {
        let ours = |block: &MinedBlock| -> Vec<(Address, u64)> {
            block
                .txs
                .iter()
                .copied()
                .filter(|(from, nonce)| sent.contains(*from, *nonce))
                .collect()
        };
        let first = blocks.iter().position(|b| !ours(b).is_empty())?;
        let last = blocks.iter().rposition(|b| !ours(b).is_empty())?;
        let window = &blocks[first..=last];

        let mut summaries = Vec::with_capacity(window.len());
        let mut all_latencies = Vec::new();
        let mut total_tx = 0u64;
        let mut total_gas_used = 0u64;
        for block in window {
            let txs = ours(block);
            let latencies: Vec<f64> = txs
                .iter()
                .filter_map(|(from, nonce)| sent.inclusion_latency(*from, *nonce, block.timestamp))
                .collect();
            all_latencies.extend_from_slice(&latencies);
            total_tx += txs.len() as u64;
            total_gas_used += block.gas_used;

            let utilization = if block.gas_limit == 0 {
                0.0
            } else {
                block.gas_used as f64 / block.gas_limit as f64
            };
            summaries.push(BlockStats {
                block_number: block.number,
                time: DateTime::from_timestamp(block.timestamp as i64, 0).unwrap_or_default(),
                gas_limit: block.gas_limit,
                gas_used: block.gas_used,
                num_tx: txs.len(),
                total_tx: block.txs.len(),
                utilization,
                latencies: LatencyStats::from_samples(&latencies).into(),
            });
        }

        let first_timestamp = parent_timestamp
            .filter(|_| first == 0)
            .unwrap_or_else(|| blocks[first.saturating_sub(1)].timestamp);
        let total_mining_time_secs = window[window.len() - 1]
            .timestamp
            .saturating_sub(first_timestamp);
        let (transactions_per_sec, gas_per_second) = if total_mining_time_secs == 0 {
            (0.0, 0.0)
        } else {
            let secs = total_mining_time_secs as f64;
            (total_tx as f64 / secs, total_gas_used as f64 / secs)
        };

        let block_times: Vec<f64> = window
            .windows(2)
            .filter(|pair| pair[1].timestamp > pair[0].timestamp)
            .map(|pair| (pair[1].timestamp - pair[0].timestamp) as f64)
            .collect();

        Some(Self {
            summaries,
            total_tx,
            total_mining_time_secs,
            total_gas_used,
            transactions_per_sec,
            gas_per_second,
            latencies: LatencyStats::from_samples(&all_latencies).into(),
            block_time: (!block_times.is_empty()).then(|| LatencyStats::from_samples(&block_times)),
        })
    }

    /// Fetches `[start, end]` and summarizes it.
    pub async fn collect(
        client: &EvmClient,
        start: u64,
        end: u64,
        batch_size: u64,
        sent: &SentTxs,
    ) -> Result<Option<Self>> {
        info!(start, end, "📊 Collecting block summary");
        let blocks: Vec<MinedBlock> = client
            .blocks_with_transactions(start, end, batch_size)
            .await?
            .iter()
            .map(MinedBlock::from_rpc)
            .collect();
        let parent_timestamp = match start.checked_sub(1) {
            Some(parent) => Some(client.block(parent).await?.header.timestamp),
            None => None,
        };
        debug!(blocks = blocks.len(), "Fetched summary blocks");
        Ok(Self::from_blocks(&blocks, parent_timestamp, sent))
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for block in &self.summaries {
            let _ = writeln!(
                out,
                "Block number: {}\tTime: {}\tGas Limit: {}\tGas Used: {}\tNum Tx: {}\tUtilization {:.2}%\tLatencies: {:.3}\t{:.3}\t{:.3}",
                block.block_number,
                block.time,
                block.gas_limit,
                block.gas_used,
                block.num_tx,
                block.utilization * 100.0,
                block.latencies.min,
                block.latencies.median,
                block.latencies.max,
            );
        }
        let _ = writeln!(out, "Total Mining Time: {}s", self.total_mining_time_secs);
        let _ = writeln!(out, "Total Transactions: {}", self.total_tx);
        let _ = writeln!(out, "Total Gas Used: {}", self.total_gas_used);
        let _ = writeln!(out, "Transactions per sec: {:.2}", self.transactions_per_sec);
        let _ = writeln!(out, "Gas Per Second: {:.2}", self.gas_per_second);
        let _ = writeln!(
            out,
            "Latencies - Min: {:.3}\tMedian: {:.3}\tMax: {:.3}",
            self.latencies.min, self.latencies.median, self.latencies.max
        );
        if let Some(block_time) = &self.block_time {
            let _ = writeln!(out, "Mean Blocktime: {:.3}s", block_time.mean);
            let _ = writeln!(out, "Median Blocktime: {:.3}s", block_time.median);
            let _ = writeln!(out, "Minimum Blocktime: {:.3}s", block_time.min);
            let _ = writeln!(out, "Maximum Blocktime: {:.3}s", block_time.max);
            let _ = writeln!(out, "Blocktime Standard Deviation: {:.3}s", block_time.stddev);
        }
        out
    }

}

/// Everything `--summary` reports, as written in JSON mode.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary<'a> {
    pub telemetry: &'a TelemetrySummary,
    pub blocks: Option<&'a BlockSummary>,
}

impl RunSummary<'_> {
    pub fn render_text(&self) -> String {
        let mut out = self.blocks.map(BlockSummary::render_text).unwrap_or_default();
        for (mode, stats) in &self.telemetry.per_mode {
            let _ = writeln!(
                out,
                "Mode: {}\tRequests: {}\tErrors: {}\tLatency ms - Mean: {:.2}\tP95: {:.2}\tP99: {:.2}",
                mode, stats.count, stats.errors, stats.latency.mean, stats.latency.p95, stats.latency.p99,
            );
        }
        for (class, count) in &self.telemetry.errors_by_class {
            let _ = writeln!(out, "Errors ({}): {}", class.as_str(), count);
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run summary")
    }

    /// Prints the summary to stdout, or writes it to `path` when given.
    pub async fn emit(&self, mode: SummaryOutputMode, path: Option<&str>) -> Result<()> {
        let rendered = match mode {
            SummaryOutputMode::Text => self.render_text(),
            SummaryOutputMode::Json => self.to_json()?,
        };
        match path {
            Some(path) => {
                tokio::fs::write(path, rendered)
                    .await
                    .with_context(|| format!("Failed to write summary to {}", path))?;
                info!(path, "Summary written");
            }
            None => println!("{}", rendered),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, timestamp: u64, gas_used: u64, txs: Vec<(Address, u64)>) -> MinedBlock {
        MinedBlock {
            number,
            timestamp,
            gas_limit: 30_000_000,
            gas_used,
            txs,
        }
    }

    #[test]
    fn test_summary_trims_to_blocks_with_own_transactions() {
        let ours = Address::with_last_byte(1);
        let other = Address::with_last_byte(2);
        let sent = SentTxs::from_parts(
            [(ours, 10..13)],
            [((ours, 10), 99_000), ((ours, 11), 99_500), ((ours, 12), 100_000)],
        );
        let blocks = vec![
            block(1, 98, 21_000, vec![(other, 0)]),
            block(2, 100, 42_000, vec![(ours, 10), (ours, 11)]),
            block(3, 102, 21_000, vec![(other, 1)]),
            block(4, 104, 63_000, vec![(ours, 12), (other, 2), (ours, 13)]),
            block(5, 106, 0, vec![]),
        ];

        let summary = BlockSummary::from_blocks(&blocks, Some(96), &sent).unwrap();
        let numbers: Vec<u64> = summary.summaries.iter().map(|b| b.block_number).collect();
        assert_eq!(numbers, vec![2, 3, 4]);
        assert_eq!(summary.total_tx, 3);
        assert_eq!(summary.summaries[2].num_tx, 1);
        assert_eq!(summary.summaries[2].total_tx, 3);
        // Mining time starts at the block before the window.
        assert_eq!(summary.total_mining_time_secs, 6);
        assert_eq!(summary.total_gas_used, 126_000);
        assert!((summary.transactions_per_sec - 0.5).abs() < 1e-9);
        assert!((summary.latencies.max - 4.0).abs() < 1e-9);
        assert!((summary.latencies.min - 0.5).abs() < 1e-9);
        assert_eq!(summary.block_time.as_ref().map(|b| b.mean), Some(2.0));
    }

    #[test]
    fn test_summary_without_own_transactions_is_none() {
        let sent = SentTxs::from_parts([(Address::with_last_byte(1), 0..1)], []);
        let blocks = vec![block(1, 1, 0, vec![(Address::with_last_byte(2), 0)])];
        assert!(BlockSummary::from_blocks(&blocks, None, &sent).is_none());
    }

    #[test]
    fn test_text_and_json_render() {
        let ours = Address::with_last_byte(1);
        let sent = SentTxs::from_parts([(ours, 0..1)], [((ours, 0), 1_000)]);
        let blocks = vec![block(7, 3, 15_000_000, vec![(ours, 0)])];
        let summary = BlockSummary::from_blocks(&blocks, Some(1), &sent).unwrap();

        let text = summary.render_text();
        assert!(text.contains("Block number: 7"));
        assert!(text.contains("Utilization 50.00%"));
        assert!(!text.contains("Blocktime"));

        let telemetry = TelemetrySummary::default();
        let run = RunSummary {
            telemetry: &telemetry,
            blocks: Some(&summary),
        };
        let json: serde_json::Value = serde_json::from_str(&run.to_json().unwrap()).unwrap();
        assert_eq!(json["blocks"]["summaries"][0]["blockNumber"], 7);
        assert_eq!(json["blocks"]["totalTx"], 1);
        assert_eq!(json["telemetry"]["count"], 0);
    }
}
