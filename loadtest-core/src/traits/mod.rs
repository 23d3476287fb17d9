use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The subset of a block header the gas manager and the adaptive rate
/// controller care about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderInfo {
    pub number: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub base_fee: Option<u64>,
}

/// Anything that can hand out block headers, usually an RPC client.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Header of the latest block.
    async fn latest_header(&self) -> Result<BlockHeaderInfo>;

    /// Header of a specific block, used to fill gaps between polls.
    async fn header_by_number(&self, number: u64) -> Result<BlockHeaderInfo>;
}

/// Called once per newly observed block, in block order.
pub trait HeaderObserver: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_new_header(&self, header: &BlockHeaderInfo);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub success: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn total(&self) -> u64 {
        self.success + self.failed
    }

    pub fn merge(&mut self, other: WorkerStats) {
        self.success += other.success;
        self.failed += other.failed;
    }
}
