use crate::contracts::LoadTester;
use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps};
use crate::tx::{TxCall, TxOpts};
use alloy_sol_types::SolCall;
use async_trait::async_trait;

/// Calls `LoadTester.inc()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementMode;

#[async_trait]
impl LoadTestMode for IncrementMode {
    fn name(&self) -> &'static str {
        "increment"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["inc"]
    }

    fn requires_load_tester(&self) -> bool {
        true
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            let contract = deps.contracts.require_load_tester()?;
            let input = LoadTester::incCall {}.abi_encode();
            deps.submit(TxCall::call(contract, input), opts).await
        })
        .await
    }
}
