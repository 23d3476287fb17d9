//! Fee Oracle - suggested fees cached per block
//!
//! Looking up fees for every transaction would double the RPC load of a test,
//! so suggestions are refreshed at most once per block. The block number
//! itself is cached for a second.
//!
//! # Pricing Rules
//!
//! - **Legacy**: forced price, else `eth_gasPrice × multiplier`
//! - **Dynamic**: tip is the forced priority price, else
//!   `eth_maxPriorityFeePerGas × multiplier`; max fee is the forced price,
//!   else `2 × baseFee + tip`. The tip never exceeds the max fee.
//!
//! A price strategy override replaces the legacy price or the max fee of a
//! single transaction.
//!
//! When the node cannot be reached the last known fees are reused, so a
//! flaky endpoint slows a run down instead of failing its requests.

use crate::client::EvmClient;
use crate::tx::FeeParams;
use alloy::eips::BlockNumberOrTag;
use anyhow::{Context, Result};
use loadtest_core::config::GasConfig;
use loadtest_core::{BlockHeaderInfo, CoreError, HeaderObserver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BLOCK_NUMBER_TTL: Duration = Duration::from_secs(1);

/// Fee-related overrides taken from the gas configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSettings {
    pub legacy: bool,
    /// Forced legacy price or max fee, 0 for none.
    pub force_price: u128,
    /// Forced priority fee, 0 for none.
    pub priority_price: u128,
    pub multiplier: f64,
}

impl FeeSettings {
    pub fn new(gas: &GasConfig, legacy: bool) -> Self {
        Self {
            legacy,
            force_price: gas.force_price as u128,
            priority_price: gas.priority_price as u128,
            multiplier: gas.price_multiplier,
        }
    }

    /// Whether fees can be produced without asking the node.
    fn fully_forced(&self) -> bool {
        if self.legacy {
            self.force_price > 0
        } else {
            self.force_price > 0 && self.priority_price > 0
        }
    }
}

/// Values read from the node for one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFees {
    pub gas_price: u128,
    pub max_priority_fee: u128,
    pub base_fee: u128,
}

pub(crate) fn scale(value: u128, multiplier: f64) -> u128 {
    if multiplier == 1.0 {
        return value;
    }
    (value as f64 * multiplier).round() as u128
}

/// Applies the pricing rules to what the node reported.
pub fn compose_fees(settings: &FeeSettings, node: NodeFees) -> FeeParams {
    if settings.legacy {
        let gas_price = if settings.force_price > 0 {
            settings.force_price
        } else {
            scale(node.gas_price, settings.multiplier)
        };
        return FeeParams::Legacy { gas_price };
    }

    let tip = if settings.priority_price > 0 {
        settings.priority_price
    } else {
        scale(node.max_priority_fee, settings.multiplier)
    };
    let max_fee = if settings.force_price > 0 {
        settings.force_price
    } else {
        node.base_fee.saturating_mul(2).saturating_add(tip)
    };
    FeeParams::Dynamic {
        max_fee_per_gas: max_fee,
        max_priority_fee_per_gas: tip.min(max_fee),
    }
}

/// Replaces the price with a strategy override, if any.
pub fn apply_override(fees: FeeParams, price: Option<u64>) -> FeeParams {
    let Some(price) = price.map(u128::from) else {
        return fees;
    };
    match fees {
        FeeParams::Legacy { .. } => FeeParams::Legacy { gas_price: price },
        FeeParams::Dynamic {
            max_priority_fee_per_gas,
            ..
        } => FeeParams::Dynamic {
            max_fee_per_gas: price,
            max_priority_fee_per_gas: max_priority_fee_per_gas.min(price),
        },
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedFees {
    block: u64,
    checked_at: Instant,
    fees: FeeParams,
}

/// Last known fees when the node cannot be asked. Fails only before the
/// first successful lookup.
fn reuse_cached(cached: Option<&CachedFees>, error: anyhow::Error) -> Result<FeeParams> {
    match cached {
        Some(cached) => {
            warn!(
                block = cached.block,
                error = %format!("{:#}", error),
                "Fee lookup failed, reusing last known fees"
            );
            Ok(cached.fees)
        }
        None => Err(error),
    }
}

#[derive(Debug)]
pub struct FeeOracle {
    client: EvmClient,
    settings: FeeSettings,
    cache: Mutex<Option<CachedFees>>,
}

impl FeeOracle {
    pub fn new(client: EvmClient, settings: FeeSettings) -> Self {
        Self {
            client,
            settings,
            cache: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &FeeSettings {
        &self.settings
    }

    /// Fees for the next transaction, with the strategy's price applied.
    pub async fn fees_for(&self, price_override: Option<u64>) -> Result<FeeParams> {
        Ok(apply_override(self.suggested().await?, price_override))
    }

    /// Suggested fees for the current block.
    pub async fn suggested(&self) -> Result<FeeParams> {
        if self.settings.fully_forced() {
            return Ok(compose_fees(&self.settings, NodeFees::default()));
        }

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.checked_at.elapsed() < BLOCK_NUMBER_TTL {
                return Ok(cached.fees);
            }
        }

        let block = match self.client.block_number().await {
            Ok(block) => block,
            Err(e) => return reuse_cached(cache.as_ref(), e),
        };
        if let Some(cached) = cache.as_mut() {
            if cached.block == block {
                cached.checked_at = Instant::now();
                return Ok(cached.fees);
            }
        }
        let node = match self.fetch_node_fees().await {
            Ok(node) => node,
            Err(e) => return reuse_cached(cache.as_ref(), e),
        };
        let fees = compose_fees(&self.settings, node);
        debug!(block, ?fees, "Refreshed suggested fees");
        *cache = Some(CachedFees {
            block,
            checked_at: Instant::now(),
            fees,
        });
        Ok(fees)
    }

    async fn fetch_node_fees(&self) -> Result<NodeFees> {
        let provider = &self.client.provider;
        if self.settings.legacy {
            return Ok(NodeFees {
                gas_price: self.client.gas_price().await?,
                ..Default::default()
            });
        }

        let max_priority_fee = if self.settings.priority_price > 0 {
            0
        } else {
            provider
                .get_max_priority_fee_per_gas()
                .await
                .context("Failed to fetch max priority fee")?
        };
        let base_fee = if self.settings.force_price > 0 {
            0
        } else {
            let history = provider
                .get_fee_history(5, BlockNumberOrTag::Latest, &[50.0])
                .await
                .context("Failed to fetch fee history")?;
            history
                .latest_block_base_fee()
                .context("Fee history has no base fee")?
        };
        Ok(NodeFees {
            gas_price: 0,
            max_priority_fee,
            base_fee,
        })
    }
}

/// Pauses workers while the chain's base fee is above a limit.
///
/// Registered as a [`HeaderObserver`] on the block watcher, which polls every
/// second.
#[derive(Debug)]
pub struct BaseFeeMonitor {
    max_base_fee: u64,
    paused: AtomicBool,
    last_base_fee: AtomicU64,
}

impl BaseFeeMonitor {
    pub fn new(max_base_fee: u64) -> Self {
        Self {
            max_base_fee,
            paused: AtomicBool::new(false),
            last_base_fee: AtomicU64::new(0),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn last_base_fee(&self) -> u64 {
        self.last_base_fee.load(Ordering::Relaxed)
    }

    /// Returns once sending may go on, or with an error on cancellation.
    pub async fn wait_until_clear(&self, token: &CancellationToken) -> Result<(), CoreError> {
        while self.is_paused() {
            tokio::select! {
                _ = token.cancelled() => return Err(CoreError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
        Ok(())
    }
}

impl HeaderObserver for BaseFeeMonitor {
    fn name(&self) -> &'static str {
        "base-fee-monitor"
    }

    fn on_new_header(&self, header: &BlockHeaderInfo) {
        let Some(base_fee) = header.base_fee else {
            return;
        };
        self.last_base_fee.store(base_fee, Ordering::Relaxed);
        let over = base_fee > self.max_base_fee;
        let was_paused = self.paused.swap(over, Ordering::AcqRel);
        if over && !was_paused {
            warn!(
                block = header.number,
                base_fee,
                max_base_fee = self.max_base_fee,
                "⏸ Base fee above limit, pausing workers"
            );
        } else if !over && was_paused {
            info!(block = header.number, base_fee, "▶ Base fee back under limit, resuming");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(legacy: bool) -> FeeSettings {
        FeeSettings {
            legacy,
            force_price: 0,
            priority_price: 0,
            multiplier: 1.0,
        }
    }

    const NODE: NodeFees = NodeFees {
        gas_price: 10_000,
        max_priority_fee: 1_000,
        base_fee: 7_000,
    };

    #[test]
    fn test_legacy_uses_scaled_gas_price() {
        let mut s = settings(true);
        s.multiplier = 1.5;
        assert_eq!(
            compose_fees(&s, NODE),
            FeeParams::Legacy { gas_price: 15_000 }
        );
        s.force_price = 42;
        assert_eq!(compose_fees(&s, NODE), FeeParams::Legacy { gas_price: 42 });
    }

    #[test]
    fn test_dynamic_max_fee_is_twice_base_plus_tip() {
        assert_eq!(
            compose_fees(&settings(false), NODE),
            FeeParams::Dynamic {
                max_fee_per_gas: 15_000,
                max_priority_fee_per_gas: 1_000,
            }
        );
    }

    #[test]
    fn test_tip_capped_at_forced_max_fee() {
        let mut s = settings(false);
        s.force_price = 500;
        assert_eq!(
            compose_fees(&s, NODE),
            FeeParams::Dynamic {
                max_fee_per_gas: 500,
                max_priority_fee_per_gas: 500,
            }
        );
        assert!(!s.fully_forced());
        s.priority_price = 100;
        assert!(s.fully_forced());
    }

    #[test]
    fn test_override_replaces_price() {
        let legacy = FeeParams::Legacy { gas_price: 1 };
        assert_eq!(
            apply_override(legacy, Some(5_000_000_000)),
            FeeParams::Legacy {
                gas_price: 5_000_000_000
            }
        );
        assert_eq!(apply_override(legacy, None), legacy);

        let dynamic = FeeParams::Dynamic {
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 50,
        };
        assert_eq!(
            apply_override(dynamic, Some(20)),
            FeeParams::Dynamic {
                max_fee_per_gas: 20,
                max_priority_fee_per_gas: 20,
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_node_reuses_last_fees() {
        let client = EvmClient::new("http://127.0.0.1:1").await.unwrap();
        let oracle = FeeOracle::new(client, settings(false));
        assert!(oracle.suggested().await.is_err());

        let known = FeeParams::Dynamic {
            max_fee_per_gas: 30_000,
            max_priority_fee_per_gas: 2_000,
        };
        *oracle.cache.lock().await = Some(CachedFees {
            block: 9,
            checked_at: Instant::now() - BLOCK_NUMBER_TTL * 5,
            fees: known,
        });
        assert_eq!(oracle.suggested().await.unwrap(), known);
        assert_eq!(oracle.fees_for(Some(25_000)).await.unwrap(), apply_override(known, Some(25_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_pauses_above_limit() {
        let monitor = std::sync::Arc::new(BaseFeeMonitor::new(100));
        let header = |number, base_fee| BlockHeaderInfo {
            number,
            base_fee: Some(base_fee),
            ..Default::default()
        };

        monitor.on_new_header(&header(1, 50));
        assert!(!monitor.is_paused());
        monitor.on_new_header(&header(2, 150));
        assert!(monitor.is_paused());

        let token = CancellationToken::new();
        let waiter = {
            let monitor = monitor.clone();
            let token = token.clone();
            tokio::spawn(async move { monitor.wait_until_clear(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(!waiter.is_finished());

        monitor.on_new_header(&header(3, 90));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(waiter.await.unwrap().is_ok());
    }
}
