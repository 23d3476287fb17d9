//! Engine - one load test run from config to summary
//!
//! # Startup
//!
//! 1. Resolve the mode names and check the mode set against the config
//! 2. Connect, read the chain id and the latest block (no base fee means
//!    legacy transactions)
//! 3. Load the main account and its nonce
//! 4. Deploy or reuse the contracts the modes need
//! 5. Build the recall index when a mode replays or reads chain history
//! 6. Build the sending account pool, dump and fund it. Modes that send
//!    from every account during init get their accounts funded up front.
//! 7. Initialise every mode
//! 8. Start the block watcher (gas wave, adaptive rate, base fee pause)
//!
//! # Run and teardown
//!
//! Workers run until the request counter is exhausted, the time limit hits
//! or the root token is cancelled. Afterwards queued receipts are drained,
//! the engine waits for the sent nonces to be mined, refunds the sending
//! accounts and emits the summaries.

use crate::account_pool::{Account, AccountPool, FundingPlan};
use crate::client::EvmClient;
use crate::contracts::DeployedContracts;
use crate::fee_oracle::{BaseFeeMonitor, FeeOracle, FeeSettings};
use crate::modes::{LoadTestMode, ModeDeps, ModeRegistry, apply_mode_rules, contract_needs};
use crate::preconf::PreconfTracker;
use crate::recall::RecallIndex;
use crate::receipts::{ReceiptTracker, TrackerSettings};
use crate::summary::{BlockSummary, RunSummary, SentTxs, log_light_summary};
use crate::tx::ChainParams;
use crate::worker::{OnDemandFunding, Worker, WorkerShared};
use alloy_primitives::U256;
use anyhow::{Context, Result};
use loadtest_core::gas::build_pricer;
use loadtest_core::{
    AdaptiveRateController, BlockWatcher, ConfigError, GasVault, LoadTestConfig,
    OscillatingGasProvider, RateLimiter, RequestCounter, RetryConfig, Telemetry,
    TelemetrySummary, Wave, WaveConfig, WorkerRunner, WorkerStats, spawn_time_limit, with_retry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retries of the first requests while the node may still be starting.
const CONNECT_RETRIES: u32 = 5;
/// Rounds of nonce polling after the workers stop.
const FINAL_BLOCK_ROUNDS: u32 = 30;
const FINAL_BLOCK_INTERVAL: Duration = Duration::from_secs(5);

/// What a finished run hands back to the caller.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub stats: WorkerStats,
    pub summary: TelemetrySummary,
    pub start_block: u64,
    /// Block in which the last nonce of the run was seen, or the head at
    /// the end of the run when nothing was submitted.
    pub final_block: u64,
}

pub struct Engine {
    config: LoadTestConfig,
    registry: ModeRegistry,
}

impl Engine {
    pub fn new(config: LoadTestConfig) -> Self {
        Self {
            config,
            registry: ModeRegistry::with_defaults(),
        }
    }

    pub fn with_registry(mut self, registry: ModeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    /// Resolves the configured modes and validates the config. Runs no I/O.
    pub fn prepare(&mut self) -> Result<Vec<Arc<dyn LoadTestMode>>, ConfigError> {
        let modes = self.registry.resolve_all(&self.config.modes)?;
        apply_mode_rules(&mut self.config, &modes)?;
        self.config.validate()?;
        Ok(modes)
    }

    /// Runs the whole load test. `token` is the root token: cancelling it
    /// stops the workers and every background task.
    pub async fn run(mut self, token: CancellationToken) -> Result<RunReport> {
        let modes = self.prepare()?;
        let config = Arc::new(self.config);
        let mode_names: Vec<&str> = modes.iter().map(|m| m.name()).collect();
        info!(
            modes = ?mode_names,
            requests = config.requests,
            concurrency = config.concurrency,
            rate_limit = config.rate_limit,
            "🚀 Starting load test"
        );
        if config.requests == 0 {
            info!("No requests to send");
            return Ok(RunReport::default());
        }

        let client = EvmClient::new(&config.rpc_url).await?;
        let connect = RetryConfig::new(CONNECT_RETRIES, 500).with_max_delay(5_000);
        let chain_id = match config.chain_id {
            Some(id) => id,
            None => with_retry(connect, "Fetching the chain id", || client.chain_id()).await?,
        };
        let latest =
            with_retry(connect, "Fetching the latest block", || client.latest_block()).await?;
        let start_block = latest.header.number;
        let legacy = config.gas.legacy_tx || latest.header.base_fee_per_gas.is_none();
        if legacy && !config.gas.legacy_tx {
            info!("Chain reports no base fee, sending legacy transactions");
        }
        if legacy && modes.iter().any(|m| m.name() == "blob") {
            anyhow::bail!("blob transactions need a chain with a base fee");
        }
        let chain = ChainParams { chain_id, legacy };
        info!(
            rpc = %client.rpc_url(),
            chain_id,
            block = start_block,
            legacy,
            "🔗 Connected"
        );

        let fees = Arc::new(FeeOracle::new(
            client.clone(),
            FeeSettings::new(&config.gas, legacy),
        ));
        let setup_fees = fees
            .suggested()
            .await
            .context("Failed to fetch suggested fees")?;

        let driver = Arc::new(Account::from_hex(config.private_key.expose())?);
        match config.start_nonce {
            Some(nonce) => driver.set_start_nonce(nonce),
            None => {
                driver.sync_nonce(&client).await?;
            }
        }
        info!(account = %driver.address(), nonce = driver.next_nonce(), "Main account ready");

        let configured = DeployedContracts {
            load_tester: config.contracts.load_tester,
            erc20: config.contracts.erc20,
            erc721: config.contracts.erc721,
        };
        let contracts = DeployedContracts::resolve(
            &client,
            configured,
            contract_needs(&modes),
            &driver,
            chain,
            setup_fees,
            &token,
        )
        .await?;

        let recall = if modes.iter().any(|m| m.requires_recall()) {
            let mut index = RecallIndex::fetch(
                &client,
                start_block,
                config.recall_length,
                config.block_batch_size,
            )
            .await?;
            index.backfill_tokens(contracts.erc20, contracts.erc721);
            Some(Arc::new(index))
        } else {
            None
        };

        let accounts = Arc::new(build_pool(&config, &driver, &client).await?);
        if let Some(path) = &config.accounts.dump_file {
            accounts.dump_ndjson(path)?;
        }
        let has_sending_accounts = accounts
            .accounts()
            .iter()
            .any(|a| a.address() != driver.address());
        let funding_amount = U256::from(config.accounts.funding_amount);
        let mut funding = None;
        let funded_before_init = modes.iter().any(|m| m.needs_funded_accounts());
        if config.funding_enabled() && has_sending_accounts {
            if config.accounts.pre_fund || funded_before_init {
                let plan = FundingPlan {
                    amount: funding_amount,
                    accounts_per_tx: config.accounts.per_funding_tx,
                    check_balance: config.accounts.check_balance_before_funding,
                };
                accounts
                    .fund(&client, &driver, plan, chain, setup_fees, &token)
                    .await?;
            } else {
                info!("Sending accounts are funded on first use");
                funding = Some(OnDemandFunding {
                    driver: driver.clone(),
                    amount: funding_amount,
                });
            }
        }

        let deps = Arc::new(ModeDeps::new(
            client.clone(),
            config.clone(),
            chain,
            contracts,
            recall,
            accounts.clone(),
            fees.clone(),
        )
        .with_driver(driver.clone()));
        for mode in &modes {
            mode.init(&deps, &token)
                .await
                .with_context(|| format!("Failed to initialise mode {}", mode.name()))?;
        }

        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        let gm = &config.gas_manager;
        let vault = gm.vault_enabled().then(|| Arc::new(GasVault::new()));
        let pricer = build_pricer(gm, config.seed)?;

        let mut watcher = BlockWatcher::new(Arc::new(client.clone()));
        if let Some(shape) = gm.wave {
            let wave = Wave::new(
                shape,
                WaveConfig {
                    period: gm.period.max(1),
                    amplitude: gm.amplitude,
                    target: gm.target,
                },
            )?;
            info!(wave = %shape, period = gm.period, amplitude = gm.amplitude, target = gm.target, "🌊 Gas wave enabled");
            watcher = watcher.with_observer(Arc::new(OscillatingGasProvider::new(wave, vault.clone())));
        }
        if config.adaptive.enabled {
            watcher = watcher.with_observer(Arc::new(AdaptiveRateController::new(
                limiter.clone(),
                &config.adaptive,
            )));
        }
        let base_fee = (config.gas.max_base_fee > 0)
            .then(|| Arc::new(BaseFeeMonitor::new(config.gas.max_base_fee)));
        if let Some(monitor) = &base_fee {
            watcher = watcher.with_observer(monitor.clone());
        }
        let watcher_token = token.child_token();
        let watcher_handle = if watcher.has_observers() {
            Some(tokio::spawn(watcher.run(watcher_token.clone())))
        } else {
            None
        };

        let telemetry = Arc::new(Telemetry::new());
        let preconf = config.preconf.check.then(|| Arc::new(PreconfTracker::new()));
        let tracker = (config.receipts.wait || preconf.is_some()).then(|| {
            Arc::new(ReceiptTracker::spawn(
                client.clone(),
                telemetry.clone(),
                preconf.clone(),
                TrackerSettings::from_config(&config.receipts, config.concurrency),
                token.clone(),
            ))
        });

        let shared = Arc::new(WorkerShared {
            deps: deps.clone(),
            modes,
            counter: Arc::new(RequestCounter::new(config.requests)),
            limiter: limiter.clone(),
            vault,
            pricer,
            base_fee,
            telemetry: telemetry.clone(),
            tracker: tracker.clone(),
            funding,
        });

        let run_token = token.child_token();
        if let Some(secs) = config.time_limit_secs {
            spawn_time_limit(run_token.clone(), Duration::from_secs(secs));
        }
        let started = Instant::now();
        let stats = WorkerRunner::run(
            config.concurrency as usize,
            run_token.clone(),
            |id, worker_token| Worker::new(id, shared.clone()).run(worker_token),
        )
        .await;
        let elapsed = started.elapsed();
        run_token.cancel();

        if let Some(tracker) = &tracker {
            tracker.drain().await;
        }

        let submitted = !config.eth_call_only && !config.output_raw_tx_only;
        let issued = accounts.total_issued();
        debug!(issued, "Nonces issued by the workers");
        let final_block = if submitted && issued > 0 && !token.is_cancelled() {
            wait_for_final_block(&client, &accounts, &token).await
        } else {
            client.block_number().await.unwrap_or(start_block)
        };

        watcher_token.cancel();
        if let Some(handle) = watcher_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Block watcher task failed");
            }
        }

        if config.accounts.refund && has_sending_accounts && submitted && !token.is_cancelled() {
            match fees.suggested().await {
                Ok(refund_fees) => {
                    if let Err(e) = accounts
                        .refund(&client, driver.address(), chain, refund_fees, &token)
                        .await
                    {
                        warn!(error = %e, "Refund failed");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to fetch fees for the refund"),
            }
        }

        let summary = telemetry.summary(elapsed);
        log_light_summary(&summary, limiter.rate());

        if config.summary.enabled {
            let sent = SentTxs::new(&accounts, &telemetry.records());
            let blocks = if submitted {
                match BlockSummary::collect(
                    &client,
                    start_block,
                    final_block,
                    config.block_batch_size,
                    &sent,
                )
                .await
                {
                    Ok(blocks) => blocks,
                    Err(e) => {
                        warn!(error = %e, "Failed to collect the block summary");
                        None
                    }
                }
            } else {
                None
            };
            RunSummary {
                telemetry: &summary,
                blocks: blocks.as_ref(),
            }
            .emit(config.summary.output_mode, config.summary.output_file.as_deref())
            .await?;
        }

        if let Some(preconf) = &preconf {
            preconf
                .finish(config.preconf.stats_file.as_deref())
                .await?;
        }

        Ok(RunReport {
            stats,
            summary,
            start_block,
            final_block,
        })
    }
}

async fn build_pool(
    config: &LoadTestConfig,
    driver: &Arc<Account>,
    client: &EvmClient,
) -> Result<AccountPool> {
    let pool = if let Some(path) = &config.accounts.from_file {
        AccountPool::from_key_file(path)?
    } else if config.accounts.count > 0 {
        AccountPool::derive_from_seed(config.seed, config.accounts.count)?
    } else {
        return Ok(AccountPool::single(driver.clone()));
    };
    pool.sync_nonces(client).await?;
    info!(accounts = pool.len(), "👥 Sending accounts ready");
    // Synced first: the main account may already have sent deployments.
    Ok(pool.share_account(driver))
}

/// Polls every used account's mined nonce until each one caught up with
/// the nonces issued to it. Returns the head block at that point.
async fn wait_for_final_block(
    client: &EvmClient,
    accounts: &AccountPool,
    token: &CancellationToken,
) -> u64 {
    let used: Vec<_> = accounts.accounts().iter().filter(|a| a.issued() > 0).collect();
    for round in 1..=FINAL_BLOCK_ROUNDS {
        let head = match client.block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "Failed to fetch the head block");
                0
            }
        };
        let mut pending = 0usize;
        for account in &used {
            match client.latest_nonce(account.address()).await {
                Ok(mined) if mined >= account.next_nonce() => {}
                Ok(mined) => {
                    debug!(
                        account = %account.address(),
                        mined,
                        issued = account.next_nonce(),
                        "Waiting for nonces to be mined"
                    );
                    pending += 1;
                }
                Err(e) => {
                    warn!(account = %account.address(), error = %e, "Failed to fetch mined nonce");
                    pending += 1;
                }
            }
        }
        if pending == 0 && head > 0 {
            info!(block = head, "⛏ All sent transactions mined");
            return head;
        }
        info!(round, pending, "Waiting for the final block");
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(FINAL_BLOCK_INTERVAL) => {}
        }
    }
    warn!("Not every sent transaction was mined, using the current head as the final block");
    client.block_number().await.unwrap_or_default()
}
