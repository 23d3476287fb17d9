//! Contract Call Mode
//!
//! Sends user-supplied calldata to a user-supplied address. With
//! `contract_call_payable` the configured amount is attached as value. Gas
//! is estimated unless a limit is forced.

use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps};
use crate::tx::{TxCall, TxOpts};
use alloy_primitives::U256;
use anyhow::Context;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct ContractCallMode;

#[async_trait]
impl LoadTestMode for ContractCallMode {
    fn name(&self) -> &'static str {
        "contract-call"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["cc"]
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            let contracts = &deps.config.contracts;
            let to = contracts
                .contract_call_address
                .context("contract-call mode needs a contract address")?;
            let calldata = contracts
                .calldata
                .clone()
                .context("contract-call mode needs calldata")?;
            let mut call = TxCall::call(to, calldata);
            if contracts.contract_call_payable {
                call = call.with_value(U256::from(deps.config.eth_amount_in_wei));
            }
            deps.submit(call, opts).await
        })
        .await
    }
}
