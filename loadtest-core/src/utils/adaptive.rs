//! Adaptive rate control.
//!
//! Watches block gas usage and nudges the shared [`RateLimiter`]: additive
//! increase while blocks stay under the target, multiplicative decrease once
//! they go over. One adjustment per window of `cycle_blocks` blocks.

use super::rate_limiter::RateLimiter;
use crate::config::AdaptiveConfig;
use crate::traits::{BlockHeaderInfo, HeaderObserver};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Debug)]
pub struct AdaptiveRateController {
    limiter: Arc<RateLimiter>,
    target_gas_used: u64,
    increment: f64,
    cycle_blocks: usize,
    backoff_factor: f64,
    window: Mutex<Vec<u64>>,
}

impl AdaptiveRateController {
    pub fn new(limiter: Arc<RateLimiter>, config: &AdaptiveConfig) -> Self {
        let cycle_blocks = config.cycle_blocks.max(1) as usize;
        Self {
            limiter,
            target_gas_used: config.target_gas_used,
            increment: config.increment,
            cycle_blocks,
            backoff_factor: config.backoff_factor,
            window: Mutex::new(Vec::with_capacity(cycle_blocks)),
        }
    }

    /// Applies one window's worth of gas usage to the limiter rate.
    fn adjust(&self, mean_gas_used: f64) {
        let old = self.limiter.rate();
        let target = self.target_gas_used as f64;

        let new = if mean_gas_used < target {
            old + self.increment
        } else if mean_gas_used > target {
            old * self.backoff_factor
        } else {
            old
        };

        self.limiter.set_rate(new);
        info!(
            mean_gas_used = mean_gas_used as u64,
            target_gas_used = self.target_gas_used,
            old_rate = format!("{old:.2}"),
            new_rate = format!("{:.2}", self.limiter.rate()),
            "Adaptive rate limit adjusted"
        );
    }
}

impl HeaderObserver for AdaptiveRateController {
    fn name(&self) -> &'static str {
        "adaptive-rate-limit"
    }

    fn on_new_header(&self, header: &BlockHeaderInfo) {
        let mean = {
            let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
            window.push(header.gas_used);
            debug!(
                block = header.number,
                gas_used = header.gas_used,
                collected = window.len(),
                "Adaptive window sample"
            );
            if window.len() < self.cycle_blocks {
                return;
            }
            let sum: u128 = window.iter().map(|g| *g as u128).sum();
            let mean = sum as f64 / window.len() as f64;
            window.clear();
            mean
        };
        self.adjust(mean);
    }
}
