//! EVM Load Test - JSON-RPC load generator for Ethereum-compatible chains
//!
//! Drives a node with signed transactions and read calls from a pool of
//! concurrent workers, using Alloy 1.4.3 for RPC, signing and ABI encoding.
//!
//! # Features
//!
//! - **12 Load Modes**: transfers, deploys, storage writes, counters, ERC20,
//!   ERC721, arbitrary contract calls, history replay, weighted RPC reads,
//!   random mixes, Uniswap V3 swaps and EIP-4844 blobs
//! - **Local Nonce Management**: one atomic counter per sending account, no
//!   nonce lookups on the hot path
//! - **Gas Shaping**: wave-driven gas budget, fixed or dynamic gas prices
//!   and a max base fee pause
//! - **Adaptive Rate Limiting**: the request rate follows block gas usage
//! - **Receipt and Preconf Tracking**: off the hot path, merged into the
//!   per-request telemetry
//!
//! # Architecture
//!
//! - **[`EvmClient`]**: Alloy provider wrapper with a retrying HTTP transport
//! - **[`AccountPool`]**: sending accounts, funding and refunds
//! - **[`LoadTestMode`]**: one trait per kind of load, looked up through the
//!   [`ModeRegistry`]
//! - **[`Worker`]**: the per-request loop
//! - **[`Engine`]**: startup, run and teardown
//!
//! Chain-agnostic pieces (config, gas wave and vault, rate limiter,
//! telemetry) live in `loadtest-core`.
//!
//! # Quick Start
//!
//! ```bash
//! # 100 transfers from 4 workers against a local node
//! cargo run -p evm-loadtest -- --rpc-url http://localhost:8545 \
//!     --requests 100 --concurrency 4 --mode t
//!
//! # Mixed ERC20/ERC721 load from a config file, 2 minutes max
//! cargo run -p evm-loadtest -- --config loadtest.toml --mode 2,7 --time-limit 120
//! ```
//!
//! # Running from code
//!
//! ```rust,no_run
//! use evm_loadtest::Engine;
//! use loadtest_core::LoadTestConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = LoadTestConfig::from_path("loadtest.toml")?;
//! let report = Engine::new(config).run(CancellationToken::new()).await?;
//! println!("{} requests, {} failed", report.stats.total(), report.stats.failed);
//! # Ok(())
//! # }
//! ```
//!
//! # Safety
//!
//! - Private keys are never logged; dumps are written only on request
//! - Key material read from files is zeroized after parsing

pub mod account_pool;
pub mod client;
pub mod contracts;
pub mod engine;
pub mod fee_oracle;
pub mod modes;
pub mod preconf;
pub mod recall;
pub mod receipts;
pub mod summary;
pub mod tx;
pub mod worker;

pub use account_pool::{Account, AccountPool, FundingPlan};
pub use client::EvmClient;
pub use contracts::{ContractKind, DeployedContracts};
pub use engine::{Engine, RunReport};
pub use fee_oracle::{BaseFeeMonitor, FeeOracle, FeeSettings};
pub use modes::{ExecOutcome, LoadTestMode, ModeDeps, ModeRegistry};
pub use recall::{RecallIndex, RecalledTx};
pub use receipts::ReceiptTracker;
pub use tx::{ChainParams, FeeParams, TxCall, TxOpts};
pub use worker::Worker;
