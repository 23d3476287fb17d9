//! Per-transaction gas price strategies.
//!
//! `None` from [`GasPricer::gas_price`] means "no override": the caller
//! falls back to the network's suggested price for that transaction.

use crate::error::GasError;
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub trait GasPricer: Send + Sync + fmt::Debug {
    fn gas_price(&self) -> Option<u64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PriceStrategy {
    #[default]
    Estimated,
    Fixed,
    Dynamic,
}

impl fmt::Display for PriceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PriceStrategy::Estimated => "estimated",
            PriceStrategy::Fixed => "fixed",
            PriceStrategy::Dynamic => "dynamic",
        })
    }
}

impl FromStr for PriceStrategy {
    type Err = GasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "estimated" => Ok(PriceStrategy::Estimated),
            "fixed" => Ok(PriceStrategy::Fixed),
            "dynamic" => Ok(PriceStrategy::Dynamic),
            other => Err(GasError::UnknownStrategy {
                name: other.to_string(),
            }),
        }
    }
}

/// Always defers to the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedGasPricer;

impl GasPricer for EstimatedGasPricer {
    fn gas_price(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedGasPricer {
    price_wei: u64,
}

impl FixedGasPricer {
    pub fn new(price_wei: u64) -> Self {
        Self { price_wei }
    }
}

impl GasPricer for FixedGasPricer {
    fn gas_price(&self) -> Option<u64> {
        Some(self.price_wei)
    }
}

/// Cycles through a list of base prices, jittering each one uniformly by
/// `±variation`. A zero entry defers to the network for that step.
#[derive(Debug)]
pub struct DynamicGasPricer {
    prices: Vec<u64>,
    variation: f64,
    index: AtomicUsize,
    rng: Mutex<StdRng>,
}

impl DynamicGasPricer {
    pub fn new(prices: Vec<u64>, variation: f64) -> Result<Self, GasError> {
        Self::with_rng(prices, variation, StdRng::from_entropy())
    }

    pub fn with_seed(prices: Vec<u64>, variation: f64, seed: u64) -> Result<Self, GasError> {
        Self::with_rng(prices, variation, StdRng::seed_from_u64(seed))
    }

    fn with_rng(prices: Vec<u64>, variation: f64, rng: StdRng) -> Result<Self, GasError> {
        if prices.is_empty() {
            return Err(GasError::EmptyPriceList);
        }
        Ok(Self {
            prices,
            variation: variation.clamp(0.0, 1.0),
            index: AtomicUsize::new(0),
            rng: Mutex::new(rng),
        })
    }
}

impl GasPricer for DynamicGasPricer {
    fn gas_price(&self) -> Option<u64> {
        let i = self.index.fetch_add(1, Ordering::Relaxed) % self.prices.len();
        let base = self.prices[i];
        if base == 0 {
            return None;
        }
        if self.variation == 0.0 {
            return Some(base);
        }

        let factor = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range((1.0 - self.variation)..=(1.0 + self.variation))
        };
        Some((base as f64 * factor).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimated_defers() {
        assert_eq!(EstimatedGasPricer.gas_price(), None);
    }

    #[test]
    fn test_fixed_returns_constant() {
        let pricer = FixedGasPricer::new(5_000_000_000);
        for _ in 0..5 {
            assert_eq!(pricer.gas_price(), Some(5_000_000_000));
        }
    }

    #[test]
    fn test_dynamic_rejects_empty_list() {
        assert_eq!(
            DynamicGasPricer::new(vec![], 0.1).unwrap_err(),
            GasError::EmptyPriceList
        );
    }

    #[test]
    fn test_dynamic_cycles_without_variation() {
        let pricer = DynamicGasPricer::with_seed(vec![10, 0, 30], 0.0, 1).unwrap();
        let got: Vec<_> = (0..6).map(|_| pricer.gas_price()).collect();
        assert_eq!(
            got,
            vec![Some(10), None, Some(30), Some(10), None, Some(30)]
        );
    }

    #[test]
    fn test_dynamic_jitter_stays_in_band() {
        let prices = vec![1_000_000_000, 2_000_000_000];
        let pricer = DynamicGasPricer::with_seed(prices.clone(), 0.25, 42).unwrap();
        for i in 0..200 {
            let base = prices[i % 2] as f64;
            let price = pricer.gas_price().unwrap() as f64;
            assert!(price >= base * 0.75 - 1.0 && price <= base * 1.25 + 1.0);
        }
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "Dynamic".parse::<PriceStrategy>().unwrap(),
            PriceStrategy::Dynamic
        );
        assert!("cheap".parse::<PriceStrategy>().is_err());
    }
}
