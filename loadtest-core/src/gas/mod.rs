//! # Gas Manager
//!
//! Gas budget and gas price control for load tests:
//!
//! - [`wave`] - periodic target function shaping the per-block budget
//! - [`vault`] - shared budget workers spend from before each transaction
//! - [`provider`] - block polling and the wave-driven budget deposits
//! - [`pricer`] - per-transaction gas price strategies

pub mod pricer;
pub mod provider;
pub mod vault;
pub mod wave;

use crate::config::GasManagerConfig;
use crate::error::GasError;
use pricer::{DynamicGasPricer, EstimatedGasPricer, FixedGasPricer, GasPricer, PriceStrategy};
use std::sync::Arc;

/// Gas limits used when a mode does not estimate.
#[derive(Debug, Clone, Copy)]
pub struct StandardGasLimits {
    pub transfer: u64,
    pub deploy: u64,
    pub contract_interact: u64,
    pub token_transfer: u64,
    pub nft_mint: u64,
    pub swap: u64,
}

impl Default for StandardGasLimits {
    fn default() -> Self {
        Self {
            transfer: 21_000,
            deploy: 1_200_000,
            contract_interact: 50_000,
            token_transfer: 100_000,
            nft_mint: 150_000,
            swap: 250_000,
        }
    }
}

/// Converts a gwei amount from the config into wei.
pub fn gwei_to_wei(gwei: u64) -> u128 {
    u128::from(gwei) * 1_000_000_000
}

/// Builds the price strategy selected in the gas manager section.
pub fn build_pricer(config: &GasManagerConfig, seed: u64) -> Result<Arc<dyn GasPricer>, GasError> {
    Ok(match config.price_strategy {
        PriceStrategy::Estimated => Arc::new(EstimatedGasPricer),
        PriceStrategy::Fixed => Arc::new(FixedGasPricer::new(config.fixed_gas_price_wei)),
        PriceStrategy::Dynamic => Arc::new(DynamicGasPricer::with_seed(
            config.dynamic_gas_prices_wei.clone(),
            config.dynamic_gas_prices_variation,
            seed,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gwei_to_wei() {
        assert_eq!(gwei_to_wei(0), 0);
        assert_eq!(gwei_to_wei(1), 1_000_000_000);
        assert_eq!(gwei_to_wei(100_000), 100_000_000_000_000);
        assert_eq!(gwei_to_wei(u64::MAX), u128::from(u64::MAX) * 1_000_000_000);
    }

    #[test]
    fn test_build_pricer_for_each_strategy() {
        let mut config = GasManagerConfig::default();
        assert_eq!(build_pricer(&config, 1).unwrap().gas_price(), None);

        config.price_strategy = PriceStrategy::Fixed;
        config.fixed_gas_price_wei = 42;
        assert_eq!(build_pricer(&config, 1).unwrap().gas_price(), Some(42));

        config.price_strategy = PriceStrategy::Dynamic;
        config.dynamic_gas_prices_wei = vec![];
        assert!(build_pricer(&config, 1).is_err());
    }
}
