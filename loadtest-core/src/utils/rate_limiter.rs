//! # Rate Limiting
//!
//! Token bucket with burst 1 shared by every worker. The bucket state is a
//! single "next free slot" timestamp advanced with compare-and-swap, so
//! acquiring never takes a lock; waiters sleep until their reserved slot.
//! The rate can be changed at runtime by the adaptive controller.

use crate::error::CoreError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How often a limiter whose rate was driven to zero re-checks its rate.
const PAUSED_POLL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct RateLimiter {
    origin: Instant,
    /// Nanoseconds since `origin` at which the next token is released.
    next_slot: AtomicU64,
    /// Tokens per second, stored as `f64` bits.
    rate: AtomicU64,
    limited: bool,
}

impl RateLimiter {
    /// Creates a limiter releasing `rate` tokens per second. A rate of zero
    /// or below disables limiting for the whole run.
    pub fn new(rate: f64) -> Self {
        let limited = rate > 0.0 && rate.is_finite();
        Self {
            origin: Instant::now(),
            next_slot: AtomicU64::new(0),
            rate: AtomicU64::new(if limited { rate } else { 0.0 }.to_bits()),
            limited,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    pub fn is_limited(&self) -> bool {
        self.limited
    }

    /// Current rate in tokens per second.
    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Acquire))
    }

    /// Replaces the rate, clamped at zero. Has no effect on an unlimited
    /// limiter.
    pub fn set_rate(&self, rate: f64) {
        let rate = if rate.is_finite() { rate.max(0.0) } else { 0.0 };
        self.rate.store(rate.to_bits(), Ordering::Release);
    }

    /// Waits for the next token.
    pub async fn acquire(&self, token: &CancellationToken) -> Result<(), CoreError> {
        if token.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        if !self.limited {
            return Ok(());
        }

        loop {
            let rate = self.rate();
            if rate <= 0.0 {
                tokio::select! {
                    _ = token.cancelled() => return Err(CoreError::Cancelled),
                    _ = tokio::time::sleep(PAUSED_POLL) => continue,
                }
            }

            let interval = (1e9 / rate) as u64;
            let now = self.origin.elapsed().as_nanos() as u64;
            let current = self.next_slot.load(Ordering::Acquire);
            let slot = current.max(now);

            if self
                .next_slot
                .compare_exchange(
                    current,
                    slot.saturating_add(interval),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                continue;
            }

            if slot > now {
                tokio::select! {
                    _ = token.cancelled() => return Err(CoreError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_nanos(slot - now)) => {}
                }
            }
            return Ok(());
        }
    }
}
