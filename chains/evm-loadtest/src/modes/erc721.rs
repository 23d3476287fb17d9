use crate::contracts::IERC721;
use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps};
use crate::tx::{TxCall, TxOpts};
use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use loadtest_core::gas::StandardGasLimits;

/// Mints a single NFT to the recipient with `mintBatch(to, 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Erc721Mode;

#[async_trait]
impl LoadTestMode for Erc721Mode {
    fn name(&self) -> &'static str {
        "erc721"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["7"]
    }

    fn requires_erc721(&self) -> bool {
        true
    }

    fn gas_limit_hint(&self, limits: &StandardGasLimits) -> u64 {
        limits.nft_mint
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            let nft = deps.contracts.require_erc721()?;
            let input = IERC721::mintBatchCall {
                to: deps.recipient(),
                quantity: U256::from(1u64),
            }
            .abi_encode();
            deps.submit(TxCall::call(nft, input), opts).await
        })
        .await
    }
}
