//! Deploy Mode
//!
//! Deploys a fresh LoadTester per request. The creation code is decoded
//! once during init.

use crate::contracts::ContractKind;
use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps};
use crate::tx::{TxCall, TxOpts};
use alloy_primitives::Bytes;
use anyhow::{Context, Result};
use async_trait::async_trait;
use loadtest_core::gas::StandardGasLimits;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct DeployMode {
    code: OnceLock<Bytes>,
}

impl DeployMode {
    fn code(&self) -> Result<Bytes> {
        if let Some(code) = self.code.get() {
            return Ok(code.clone());
        }
        let code = ContractKind::LoadTester.bytecode()?;
        Ok(self.code.get_or_init(|| code).clone())
    }
}

#[async_trait]
impl LoadTestMode for DeployMode {
    fn name(&self) -> &'static str {
        "deploy"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["d"]
    }

    fn gas_limit_hint(&self, limits: &StandardGasLimits) -> u64 {
        limits.deploy
    }

    async fn init(&self, _deps: &ModeDeps, _token: &CancellationToken) -> Result<()> {
        self.code().context("LoadTester creation code unavailable")?;
        Ok(())
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            let call = TxCall::create(self.code()?);
            deps.submit(call, opts).await
        })
        .await
    }
}
