//! Uniswap V3 Mode
//!
//! Swaps `swap_amount_in` through `exactInputSingle` on a pre-wired router
//! and pool. Even nonces swap token0 for token1, odd nonces swap back, so a
//! long run keeps both balances roughly level. The swap output goes back
//! to the sender.
//!
//! Sending accounts are funded before init. Init then moves an even share
//! of both pool tokens from the main account to every sending account
//! holding less than one swap, approves the router to spend both tokens
//! from every sending account and waits for all of it to land.

use crate::account_pool::Account;
use crate::contracts::{IERC20, ISwapRouter02};
use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps};
use crate::receipts::await_receipt;
use crate::tx::{FeeParams, TxCall, TxOpts};
use alloy::network::ReceiptResponse as _;
use alloy_primitives::aliases::{U24, U160};
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolCall;
use anyhow::{Context, Result};
use async_trait::async_trait;
use loadtest_core::RetryConfig;
use loadtest_core::config::UniswapV3Config;
use loadtest_core::gas::StandardGasLimits;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pool {
    router: Address,
    token0: Address,
    token1: Address,
}

impl Pool {
    fn from_config(config: &UniswapV3Config) -> Result<Self> {
        Ok(Self {
            router: config
                .router
                .context("uniswapv3 mode needs a router address")?,
            token0: config
                .pool_token0
                .context("uniswapv3 mode needs pool token 0")?,
            token1: config
                .pool_token1
                .context("uniswapv3 mode needs pool token 1")?,
        })
    }

    /// `(token_in, token_out)` for a given nonce.
    fn direction(&self, nonce: u64) -> (Address, Address) {
        if nonce % 2 == 0 {
            (self.token0, self.token1)
        } else {
            (self.token1, self.token0)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UniswapV3Mode;

#[async_trait]
impl LoadTestMode for UniswapV3Mode {
    fn name(&self) -> &'static str {
        "uniswapv3"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["v3"]
    }

    fn gas_limit_hint(&self, limits: &StandardGasLimits) -> u64 {
        limits.swap
    }

    fn needs_funded_accounts(&self) -> bool {
        true
    }

    async fn init(&self, deps: &ModeDeps, token: &CancellationToken) -> Result<()> {
        let pool = Pool::from_config(&deps.config.uniswap_v3)?;
        if deps.config.eth_call_only {
            return Ok(());
        }

        let fees = deps.fees.suggested().await?;
        let retry = RetryConfig::new(60, 500).with_max_delay(5_000);
        if let Some(driver) = &deps.driver {
            let transfers = supply_pool_tokens(deps, driver, &pool, fees).await?;
            for hash in &transfers {
                let receipt = await_receipt(&deps.client, *hash, retry, token).await?;
                anyhow::ensure!(receipt.status(), "pool token transfer {} reverted", hash);
            }
        }

        let mut pending = Vec::new();
        for account in deps.accounts.accounts() {
            for erc20 in [pool.token0, pool.token1] {
                let input = IERC20::approveCall {
                    spender: pool.router,
                    amount: U256::MAX,
                }
                .abi_encode();
                let hash = account
                    .send(&deps.client, TxCall::call(erc20, input), deps.chain, fees)
                    .await
                    .with_context(|| format!("Failed to approve router for {}", erc20))?;
                pending.push(hash);
            }
        }

        for hash in &pending {
            let receipt = await_receipt(&deps.client, *hash, retry, token).await?;
            anyhow::ensure!(receipt.status(), "router approval {} reverted", hash);
        }
        info!(
            approvals = pending.len(),
            router = %pool.router,
            "✅ Router approved for both pool tokens"
        );
        Ok(())
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            let config = &deps.config.uniswap_v3;
            let pool = Pool::from_config(config)?;
            let (token_in, token_out) = pool.direction(opts.nonce);
            let input = ISwapRouter02::exactInputSingleCall {
                params: ISwapRouter02::ExactInputSingleParams {
                    tokenIn: token_in,
                    tokenOut: token_out,
                    fee: U24::from(config.pool_fees),
                    recipient: opts.from(),
                    amountIn: U256::from(config.swap_amount_in),
                    amountOutMinimum: U256::ZERO,
                    sqrtPriceLimitX96: U160::ZERO,
                },
            }
            .abi_encode();
            deps.submit(TxCall::call(pool.router, input), opts).await
        })
        .await
    }
}

async fn token_balance(deps: &ModeDeps, token: Address, owner: Address) -> Result<U256> {
    let input = IERC20::balanceOfCall { account: owner }.abi_encode();
    let output = deps
        .client
        .call(TxCall::call(token, input).to_request(owner), None)
        .await
        .with_context(|| format!("Failed to read {} balance of {}", token, owner))?;
    IERC20::balanceOfCall::abi_decode_returns(&output)
        .with_context(|| format!("Malformed balanceOf answer from {}", token))
}

/// Even split of `balance` over the accounts that need tokens, the main
/// account keeping one share when it sends swaps too.
fn token_share(balance: U256, recipients: usize, driver_swaps: bool) -> U256 {
    let shares = recipients + usize::from(driver_swaps);
    if shares == 0 {
        return U256::ZERO;
    }
    balance / U256::from(shares)
}

/// Moves pool tokens from the main account to every sending account that
/// holds less than one swap. Returns the transfer hashes.
async fn supply_pool_tokens(
    deps: &ModeDeps,
    driver: &Account,
    pool: &Pool,
    fees: FeeParams,
) -> Result<Vec<B256>> {
    let swap_amount = U256::from(deps.config.uniswap_v3.swap_amount_in);
    let driver_swaps = deps
        .accounts
        .accounts()
        .iter()
        .any(|a| a.address() == driver.address());
    let mut hashes = Vec::new();

    for erc20 in [pool.token0, pool.token1] {
        let mut recipients = Vec::new();
        for account in deps.accounts.accounts() {
            if account.address() == driver.address() {
                continue;
            }
            if token_balance(deps, erc20, account.address()).await? < swap_amount {
                recipients.push(account.address());
            }
        }
        if recipients.is_empty() {
            continue;
        }

        let available = token_balance(deps, erc20, driver.address()).await?;
        let share = token_share(available, recipients.len(), driver_swaps);
        anyhow::ensure!(
            share >= swap_amount,
            "main account holds {} of {}, too little to supply {} sending accounts",
            available,
            erc20,
            recipients.len()
        );
        for to in &recipients {
            let input = IERC20::transferCall {
                to: *to,
                amount: share,
            }
            .abi_encode();
            let hash = driver
                .send(&deps.client, TxCall::call(erc20, input), deps.chain, fees)
                .await
                .with_context(|| format!("Failed to transfer {} to {}", erc20, to))?;
            hashes.push(hash);
        }
        info!(token = %erc20, %share, accounts = recipients.len(), "Supplied pool tokens");
    }
    Ok(hashes)
}
