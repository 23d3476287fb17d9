//! ERC20 Mode
//!
//! Transfers one base unit of the test token to the configured recipient,
//! or to a random address when random recipients are enabled. The sender
//! must hold tokens, which is only true for the account that deployed the
//! token unless balances were distributed beforehand.

use crate::contracts::IERC20;
use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps};
use crate::tx::{TxCall, TxOpts};
use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use loadtest_core::gas::StandardGasLimits;

#[derive(Debug, Clone, Copy, Default)]
pub struct Erc20Mode;

#[async_trait]
impl LoadTestMode for Erc20Mode {
    fn name(&self) -> &'static str {
        "erc20"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["2"]
    }

    fn requires_erc20(&self) -> bool {
        true
    }

    fn gas_limit_hint(&self, limits: &StandardGasLimits) -> u64 {
        limits.token_transfer
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            let token = deps.contracts.require_erc20()?;
            let input = IERC20::transferCall {
                to: deps.recipient(),
                amount: U256::from(1u64),
            }
            .abi_encode();
            deps.submit(TxCall::call(token, input), opts).await
        })
        .await
    }
}
