//! # Load Test Core - Chain-Agnostic Load Generation Primitives
//!
//! This crate provides the building blocks shared by chain-specific load
//! test engines. Nothing in here talks to a node directly: block headers come
//! in through the [`traits::HeaderSource`] seam.
//!
//! ## Modules
//!
//! - [`config`] - Load test configuration, TOML loading and validation
//! - [`error`] - Typed error handling with thiserror
//! - [`gas`] - Gas budget waves, vault, provider and price strategies
//! - [`telemetry`] - Per-request records and run summaries
//! - [`traits`] - Core trait definitions
//! - `utils` - Logger, rate limiting, adaptive control, retries, worker runner

// Module declarations - internal modules marked pub(crate)
pub mod config;
pub mod error;
pub mod gas;
pub mod telemetry;
pub mod traits;
pub(crate) mod utils;

// Selective exports - only public API types
pub use config::{LoadTestConfig, SecretKeyHex, SummaryOutputMode};
pub use error::{ConfigError, CoreError, GasError};
pub use gas::pricer::{GasPricer, PriceStrategy};
pub use gas::provider::{BlockWatcher, OscillatingGasProvider};
pub use gas::vault::GasVault;
pub use gas::wave::{Wave, WaveConfig, WaveShape};
pub use telemetry::{
    ErrorClass, LatencyStats, PreconfStats, ReceiptStatus, Telemetry, TelemetrySummary, TxRecord,
};
pub use traits::{BlockHeaderInfo, HeaderObserver, HeaderSource, WorkerStats};

// Utils are pub(crate) - only export specific public utilities
pub use utils::{
    setup_logger, spawn_shutdown_triggers, spawn_time_limit, AdaptiveRateController, RateLimiter,
    RequestCounter, WorkerRunner, RESULT_TARGET,
};

// Export retry utilities for the chain crates
pub use utils::retry::{
    classify_rpc_error, is_rejection, is_transient_error, poll_with_backoff, with_retry,
    PollOutcome, RetryConfig, RpcErrorKind,
};
