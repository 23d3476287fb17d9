//! Shared gas budget.
//!
//! Deposits come from the gas provider once per block, spends come from
//! workers before every transaction. A spender that finds the budget short
//! parks on a [`Notify`] until the next deposit or until the run is
//! cancelled.

use crate::error::CoreError;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct GasVault {
    budget: Mutex<u64>,
    deposited: Notify,
}

impl GasVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `amount` to the budget, saturating at `u64::MAX`, and wakes every
    /// blocked spender.
    pub fn add_gas(&self, amount: u64) {
        {
            let mut budget = self.lock();
            match budget.checked_add(amount) {
                Some(total) => *budget = total,
                None => {
                    warn!(
                        budget = *budget,
                        amount, "Gas vault overflow, clamping budget at u64::MAX"
                    );
                    *budget = u64::MAX;
                }
            }
            debug!(budget = *budget, amount, "Gas added to vault");
        }
        self.deposited.notify_waiters();
    }

    /// Waits until at least `amount` gas is available and takes it.
    ///
    /// Returns [`CoreError::Cancelled`] without touching the budget when
    /// `token` is (or becomes) cancelled first.
    pub async fn spend_or_wait(
        &self,
        token: &CancellationToken,
        amount: u64,
    ) -> Result<(), CoreError> {
        loop {
            if token.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            // Register interest before checking so a deposit between the
            // check and the await is not missed.
            let notified = self.deposited.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_spend(amount) {
                return Ok(());
            }

            tokio::select! {
                _ = token.cancelled() => return Err(CoreError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    /// Takes `amount` if it is available right now.
    pub fn try_spend(&self, amount: u64) -> bool {
        let mut budget = self.lock();
        if *budget >= amount {
            *budget -= amount;
            true
        } else {
            false
        }
    }

    pub fn available(&self) -> u64 {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, u64> {
        // The guarded value is a plain integer, a poisoned lock still holds
        // a consistent budget.
        self.budget.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_add_and_spend() {
        let vault = GasVault::new();
        vault.add_gas(100);
        assert!(vault.try_spend(60));
        assert!(!vault.try_spend(60));
        assert_eq!(vault.available(), 40);
    }

    #[test]
    fn test_add_saturates() {
        let vault = GasVault::new();
        vault.add_gas(u64::MAX - 1);
        vault.add_gas(10);
        assert_eq!(vault.available(), u64::MAX);
        vault.add_gas(1);
        assert_eq!(vault.available(), u64::MAX);
    }

    #[tokio::test]
    async fn test_spend_with_cancelled_token_leaves_budget() {
        let vault = GasVault::new();
        vault.add_gas(1_000);
        let token = CancellationToken::new();
        token.cancel();

        let err = vault.spend_or_wait(&token, 10).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(vault.available(), 1_000);
    }

    #[tokio::test]
    async fn test_blocked_spender_wakes_on_deposit() {
        let vault = Arc::new(GasVault::new());
        let token = CancellationToken::new();

        let spender = {
            let vault = vault.clone();
            let token = token.clone();
            tokio::spawn(async move { vault.spend_or_wait(&token, 500).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!spender.is_finished());

        vault.add_gas(200);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!spender.is_finished());

        vault.add_gas(300);
        spender.await.unwrap().unwrap();
        assert_eq!(vault.available(), 0);
    }

    #[tokio::test]
    async fn test_blocked_spender_observes_cancellation() {
        let vault = Arc::new(GasVault::new());
        let token = CancellationToken::new();

        let spender = {
            let vault = vault.clone();
            let token = token.clone();
            tokio::spawn(async move { vault.spend_or_wait(&token, 1).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), spender)
            .await
            .expect("spender should wake on cancel")
            .unwrap();
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }
}
