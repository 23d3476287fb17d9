//! Random Mode
//!
//! Picks one of the transaction-producing modes per request with the run's
//! seeded generator: transaction, deploy, store, increment, erc20 or erc721.

use crate::modes::{
    DeployMode, Erc20Mode, Erc721Mode, ExecOutcome, IncrementMode, LoadTestMode, ModeDeps,
    StoreMode, TransactionMode,
};
use crate::tx::TxOpts;
use anyhow::Result;
use async_trait::async_trait;
use loadtest_core::gas::StandardGasLimits;
use rand::Rng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct RandomMode {
    choices: Vec<Arc<dyn LoadTestMode>>,
}

impl std::fmt::Debug for RandomMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.choices.iter().map(|m| m.name()).collect();
        f.debug_struct("RandomMode").field("choices", &names).finish()
    }
}

impl Default for RandomMode {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomMode {
    pub fn new() -> Self {
        Self {
            choices: vec![
                Arc::new(TransactionMode),
                Arc::new(DeployMode::default()),
                Arc::new(StoreMode),
                Arc::new(IncrementMode),
                Arc::new(Erc20Mode),
                Arc::new(Erc721Mode),
            ],
        }
    }
}

#[async_trait]
impl LoadTestMode for RandomMode {
    fn name(&self) -> &'static str {
        "random"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["r"]
    }

    fn requires_load_tester(&self) -> bool {
        true
    }

    fn requires_erc20(&self) -> bool {
        true
    }

    fn requires_erc721(&self) -> bool {
        true
    }

    /// Enough for whichever mode gets picked.
    fn gas_limit_hint(&self, limits: &StandardGasLimits) -> u64 {
        self.choices
            .iter()
            .map(|mode| mode.gas_limit_hint(limits))
            .max()
            .unwrap_or(limits.contract_interact)
    }

    async fn init(&self, deps: &ModeDeps, token: &CancellationToken) -> Result<()> {
        for mode in &self.choices {
            mode.init(deps, token).await?;
        }
        Ok(())
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        let index = deps.with_rng(|rng| rng.gen_range(0..self.choices.len()));
        self.choices[index].execute(deps, opts).await
    }
}
