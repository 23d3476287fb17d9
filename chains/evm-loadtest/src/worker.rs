//! Worker - one load generation loop
//!
//! Workers pull request indices from the shared [`RequestCounter`] until it
//! runs dry or the run is cancelled. Per request:
//!
//! 1. wait while the base fee is above the configured maximum
//! 2. take a rate limiter token
//! 3. pick the mode (fixed, or a worker-local cycle over several modes)
//! 4. reserve the gas hint from the vault
//! 5. fund the account on first use, unless funding happened up front
//! 6. resolve fees
//! 7. issue the nonce of account `index mod pool size`
//! 8. execute, record, hand the hash to the receipt tracker
//!
//! Every step before the nonce is issued can be cancelled; once a nonce is
//! out, the request always ends up as a [`TxRecord`]. A request that fails
//! before its transaction reached the node has its nonce filled with a
//! zero-value self-transfer, so the account's later nonces stay minable.

use crate::account_pool::Account;
use crate::fee_oracle::BaseFeeMonitor;
use crate::modes::{LoadTestMode, ModeDeps};
use crate::receipts::ReceiptTracker;
use crate::tx::TxOpts;
use alloy_primitives::U256;
use anyhow::Result;
use loadtest_core::gas::pricer::GasPricer;
use loadtest_core::{
    CoreError, ErrorClass, GasVault, RESULT_TARGET, RateLimiter, RequestCounter, Telemetry,
    TxRecord, WorkerStats, is_rejection,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by all workers of a run.
pub struct WorkerShared {
    pub deps: Arc<ModeDeps>,
    pub modes: Vec<Arc<dyn LoadTestMode>>,
    pub counter: Arc<RequestCounter>,
    pub limiter: Arc<RateLimiter>,
    pub vault: Option<Arc<GasVault>>,
    pub pricer: Arc<dyn GasPricer>,
    pub base_fee: Option<Arc<BaseFeeMonitor>>,
    pub telemetry: Arc<Telemetry>,
    pub tracker: Option<Arc<ReceiptTracker>>,
    pub funding: Option<OnDemandFunding>,
}

/// Funding source for sending accounts that were not funded before the run.
#[derive(Debug, Clone)]
pub struct OnDemandFunding {
    pub driver: Arc<Account>,
    pub amount: U256,
}

pub struct Worker {
    id: usize,
    shared: Arc<WorkerShared>,
    mode_cursor: usize,
}

impl Worker {
    pub fn new(id: usize, shared: Arc<WorkerShared>) -> Self {
        // Offset the cycle so that workers interleave modes from the start.
        let mode_cursor = id.saturating_sub(1);
        Self {
            id,
            shared,
            mode_cursor,
        }
    }

    pub async fn run(mut self, token: CancellationToken) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();
        while !token.is_cancelled() {
            let Some(index) = self.shared.counter.next_index() else {
                break;
            };
            match self.step(index, &token).await {
                Ok(true) => stats.success += 1,
                Ok(false) => stats.failed += 1,
                Err(CoreError::Cancelled) => break,
                Err(e) => return Err(e.into()),
            }
        }
        debug!(worker = self.id, ?stats, "Worker finished");
        Ok(stats)
    }

    fn select_mode(&mut self) -> Arc<dyn LoadTestMode> {
        let modes = &self.shared.modes;
        if modes.len() == 1 {
            return modes[0].clone();
        }
        let mode = modes[self.mode_cursor % modes.len()].clone();
        self.mode_cursor = self.mode_cursor.wrapping_add(1);
        mode
    }

    /// Runs one request. `Ok(success)` once a record was written,
    /// `Err(Cancelled)` if the run stopped before a nonce was issued.
    async fn step(&mut self, index: u64, token: &CancellationToken) -> Result<bool, CoreError> {
        let shared = self.shared.clone();
        let deps = &shared.deps;

        if let Some(monitor) = &shared.base_fee {
            monitor.wait_until_clear(token).await?;
        }
        shared.limiter.acquire(token).await?;

        let mode = self.select_mode();
        let forced_limit = Some(deps.config.gas.force_limit).filter(|limit| *limit > 0);
        if let Some(vault) = &shared.vault {
            let hint = forced_limit.unwrap_or_else(|| mode.gas_limit_hint(&deps.gas_limits));
            if hint > 0 {
                vault.spend_or_wait(token, hint).await?;
            }
        }

        let account: Arc<Account> = deps.accounts.pick(index).clone();
        if let Some(funding) = &shared.funding {
            if !account.is_funded() && account.address() != funding.driver.address() {
                let funded = match deps.fees.suggested().await {
                    Ok(fees) => {
                        account
                            .ensure_funded(
                                &deps.client,
                                &funding.driver,
                                funding.amount,
                                deps.chain,
                                fees,
                                token,
                            )
                            .await
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = funded {
                    if token.is_cancelled() {
                        return Err(CoreError::Cancelled);
                    }
                    warn!(account = %account.address(), error = %e, "Failed to fund sending account");
                    return Ok(false);
                }
            }
        }

        // Fees first: a failed lookup must not leave an issued nonce behind.
        let fees = match deps.fees.fees_for(shared.pricer.gas_price()).await {
            Ok(fees) => fees,
            Err(e) => {
                warn!(
                    mode = mode.name(),
                    account = %account.address(),
                    error = %e,
                    "Failed to resolve fees, skipping request"
                );
                return Ok(false);
            }
        };

        let nonce = account.issue_nonce();
        let record = TxRecord::new(index, mode.name(), account.address(), nonce);
        let opts = TxOpts {
            account: account.clone(),
            nonce,
            chain_id: deps.chain.chain_id,
            fees,
            gas_limit: forced_limit,
        };
        let outcome = mode.execute(deps, &opts).await;

        let mut record = record.finish(outcome.latency());
        if let Some(hash) = outcome.hash {
            record = record.with_hash(hash);
        }
        let success = match &outcome.error {
            None => {
                info!(
                    target: RESULT_TARGET,
                    mode = mode.name(),
                    nonce,
                    account = %account.address(),
                    hash = ?outcome.hash,
                    latency_ms = record.latency_ms as u64,
                    "Request sent"
                );
                true
            }
            Some(e) => {
                let mut message = format!("{:#}", e);
                if is_rejection(e) {
                    warn!(
                        mode = mode.name(),
                        nonce,
                        account = %account.address(),
                        error = %message,
                        "Transaction rejected, nonce is not reused"
                    );
                } else {
                    warn!(
                        mode = mode.name(),
                        nonce,
                        account = %account.address(),
                        error = %message,
                        "Request failed"
                    );
                }
                if outcome.hash.is_none() && !deps.config.eth_call_only && !nonce_taken(&message)
                {
                    message = fill_gap(deps, &opts, message).await;
                }
                record = record.with_error(ErrorClass::Submit, message);
                false
            }
        };
        shared.telemetry.record(record);

        if let (Some(hash), Some(tracker)) = (outcome.hash, &shared.tracker) {
            tracker.enqueue(hash);
        }
        Ok(success)
    }
}

/// Node answers meaning the nonce is already occupied by a transaction.
fn nonce_taken(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("nonce too low") || message.contains("already known")
}

/// Sends a self-transfer at a nonce whose request never reached the node.
/// Returns the record's error message.
async fn fill_gap(deps: &ModeDeps, opts: &TxOpts, message: String) -> String {
    match deps.fill_nonce(opts).await {
        Ok(_) => {
            debug!(account = %opts.from(), nonce = opts.nonce, "Nonce filled by self-transfer");
            format!("{message} (nonce filled by self-transfer)")
        }
        Err(e) => {
            warn!(
                account = %opts.from(),
                nonce = opts.nonce,
                error = %format!("{:#}", e),
                "Failed to fill nonce, later nonces of this account may stall"
            );
            format!("{message} (nonce gap: {e:#})")
        }
    }
}
