//! Transaction Mode
//!
//! Sends `eth_amount_in_wei` to the configured recipient (or a random one)
//! with a fixed 21000 gas limit.

use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps};
use crate::tx::{TxCall, TxOpts};
use alloy_primitives::U256;
use async_trait::async_trait;
use loadtest_core::gas::StandardGasLimits;

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionMode;

#[async_trait]
impl LoadTestMode for TransactionMode {
    fn name(&self) -> &'static str {
        "transaction"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["t"]
    }

    fn gas_limit_hint(&self, limits: &StandardGasLimits) -> u64 {
        limits.transfer
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            let value = U256::from(deps.config.eth_amount_in_wei);
            deps.submit(TxCall::transfer(deps.recipient(), value), opts).await
        })
        .await
    }
}
