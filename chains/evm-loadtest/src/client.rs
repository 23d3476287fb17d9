//! EVM Client - Alloy-based JSON-RPC provider for load tests
//!
//! Wraps Alloy's provider with the transport settings the load generator
//! needs: a pooled reqwest client with tight timeouts and a retry-backoff
//! layer for transient failures.
//!
//! # Retry Logic
//!
//! The transport retries failed requests with exponential backoff:
//! - Max retries: 5
//! - Initial backoff: 100ms
//! - Compute units per second: 2000
//!
//! Rejections from the node (`nonce too low`, `already known`, ...) are JSON-RPC
//! errors, not transport errors, so they reach the caller unretried.
//!
//! # Example
//!
//! ```rust,no_run
//! use evm_loadtest::EvmClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = EvmClient::new("http://localhost:8545").await?;
//! let chain_id = client.chain_id().await?;
//! println!("Connected to chain {}", chain_id);
//! # Ok(())
//! # }
//! ```

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::providers::Provider;
use alloy::rpc::client::ClientBuilder;
use alloy::rpc::types::{
    Block, Filter, Log, Transaction, TransactionReceipt, TransactionRequest,
};
use alloy::transports::http::Http;
use alloy::transports::layers::RetryBackoffLayer;
use alloy_primitives::{Address, B256, Bytes, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use loadtest_core::{BlockHeaderInfo, HeaderSource};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Shared JSON-RPC client.
///
/// `Clone` is cheap: every clone shares the same provider and its connection
/// pool.
#[derive(Clone)]
pub struct EvmClient {
    /// Alloy provider for blockchain interactions
    pub provider: Arc<dyn Provider + Send + Sync>,
    rpc_url: String,
}

impl std::fmt::Debug for EvmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmClient")
            .field("rpc_url", &self.rpc_url)
            .finish()
    }
}

impl EvmClient {
    /// Creates a client with the default HTTP settings.
    pub async fn new(rpc_url: &str) -> Result<Self> {
        let reqwest_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(64)
            .build()
            .context("Failed to build HTTP client")?;
        Self::new_from_reqwest(rpc_url, reqwest_client)
    }

    /// Creates a client from a pre-configured reqwest client.
    pub fn new_from_reqwest(rpc_url: &str, reqwest_client: Client) -> Result<Self> {
        let http_transport = Http::with_client(
            reqwest_client,
            rpc_url.parse::<Url>().context("Invalid RPC URL")?,
        );

        let client = ClientBuilder::default()
            .layer(RetryBackoffLayer::new(5, 100, 2000))
            .transport(http_transport, false);

        let provider: Arc<dyn Provider + Send + Sync> = Arc::new(
            alloy::providers::ProviderBuilder::new()
                .disable_recommended_fillers()
                .connect_client(client),
        );

        Ok(Self {
            provider,
            rpc_url: rpc_url.to_string(),
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .context("Failed to fetch chain id")
    }

    pub async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to fetch block number")
    }

    /// Latest block, transaction hashes only.
    pub async fn latest_block(&self) -> Result<Block> {
        self.provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .context("Failed to fetch latest block")?
            .context("Node returned no latest block")
    }

    pub async fn block(&self, number: u64) -> Result<Block> {
        self.provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .with_context(|| format!("Failed to fetch block {}", number))?
            .with_context(|| format!("Block {} not found", number))
    }

    /// Fetches `[from, to]` with full transaction bodies, `batch_size`
    /// requests in flight at a time. Missing blocks are skipped.
    pub async fn blocks_with_transactions(
        &self,
        from: u64,
        to: u64,
        batch_size: u64,
    ) -> Result<Vec<Block>> {
        self.block_range(from, to, batch_size, true).await
    }

    /// Same as [`EvmClient::blocks_with_transactions`] with transaction
    /// hashes only.
    pub async fn blocks_in_range(&self, from: u64, to: u64, batch_size: u64) -> Result<Vec<Block>> {
        self.block_range(from, to, batch_size, false).await
    }

    async fn block_range(
        &self,
        from: u64,
        to: u64,
        batch_size: u64,
        full: bool,
    ) -> Result<Vec<Block>> {
        let batch_size = batch_size.max(1);
        let mut blocks = Vec::with_capacity(to.saturating_sub(from) as usize + 1);
        let mut start = from;
        while start <= to {
            let end = (start + batch_size - 1).min(to);
            let requests = (start..=end).map(|n| async move {
                let request = self.provider.get_block_by_number(BlockNumberOrTag::Number(n));
                let request = if full { request.full() } else { request };
                request
                    .await
                    .with_context(|| format!("Failed to fetch block {}", n))
            });
            for block in join_all(requests).await {
                if let Some(block) = block? {
                    blocks.push(block);
                }
            }
            tracing::debug!(from = start, to = end, "Fetched block batch");
            start = end + 1;
        }
        Ok(blocks)
    }

    pub async fn gas_price(&self) -> Result<u128> {
        self.provider
            .get_gas_price()
            .await
            .context("Failed to fetch gas price")
    }

    pub async fn pending_nonce(&self, address: Address) -> Result<u64> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .with_context(|| format!("Failed to fetch pending nonce for {}", address))
    }

    pub async fn latest_nonce(&self, address: Address) -> Result<u64> {
        self.provider
            .get_transaction_count(address)
            .latest()
            .await
            .with_context(|| format!("Failed to fetch nonce for {}", address))
    }

    pub async fn balance(&self, address: Address) -> Result<U256> {
        self.provider
            .get_balance(address)
            .await
            .with_context(|| format!("Failed to fetch balance for {}", address))
    }

    pub async fn has_code(&self, address: Address) -> Result<bool> {
        Ok(!self.code(address).await?.is_empty())
    }

    pub async fn estimate_gas(&self, request: TransactionRequest) -> Result<u64> {
        self.provider
            .estimate_gas(request)
            .await
            .context("Failed to estimate gas")
    }

    pub async fn code(&self, address: Address) -> Result<Bytes> {
        self.provider
            .get_code_at(address)
            .await
            .with_context(|| format!("Failed to fetch code at {}", address))
    }

    /// `eth_call` at `block`, or at the latest block when `None`.
    pub async fn call(&self, request: TransactionRequest, block: Option<u64>) -> Result<Bytes> {
        let block = block.map_or(BlockId::latest(), BlockId::number);
        self.provider
            .call(request)
            .block(block)
            .await
            .context("eth_call failed")
    }

    pub async fn transaction_by_hash(&self, hash: B256) -> Result<Option<Transaction>> {
        self.provider
            .get_transaction_by_hash(hash)
            .await
            .with_context(|| format!("Failed to fetch transaction {}", hash))
    }

    pub async fn logs_by_block_hash(&self, block_hash: B256) -> Result<Vec<Log>> {
        let filter = Filter::new().at_block_hash(block_hash);
        self.provider
            .get_logs(&filter)
            .await
            .with_context(|| format!("Failed to fetch logs of block {}", block_hash))
    }

    /// Submits a signed, EIP-2718 encoded transaction.
    pub async fn send_raw(&self, raw: &[u8]) -> Result<B256> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(*pending.tx_hash())
    }

    pub async fn receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .with_context(|| format!("Failed to fetch receipt for {}", hash))
    }

    /// `eth_checkPreconfStatus`, available on nodes that expose
    /// preconfirmations.
    pub async fn preconf_status(&self, hash: B256) -> Result<bool> {
        let confirmed: bool = self
            .provider
            .client()
            .request("eth_checkPreconfStatus", (hash,))
            .await
            .with_context(|| format!("Failed to check preconf status for {}", hash))?;
        Ok(confirmed)
    }
}

pub(crate) fn header_info(block: &Block) -> BlockHeaderInfo {
    BlockHeaderInfo {
        number: block.header.number,
        gas_used: block.header.gas_used,
        gas_limit: block.header.gas_limit,
        base_fee: block.header.base_fee_per_gas,
    }
}

#[async_trait]
impl HeaderSource for EvmClient {
    async fn latest_header(&self) -> Result<BlockHeaderInfo> {
        Ok(header_info(&self.latest_block().await?))
    }

    async fn header_by_number(&self, number: u64) -> Result<BlockHeaderInfo> {
        Ok(header_info(&self.block(number).await?))
    }
}
