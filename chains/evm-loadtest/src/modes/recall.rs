//! Recall Mode
//!
//! Replays a random transaction from the recall index. Recipient, value,
//! calldata and gas limit are kept; nonce and fees are the worker's. Type-0
//! and type-1 originals are sent as legacy transactions, everything else as
//! EIP-1559. In call-only runs the call executes against the original's
//! block unless the latest block was requested.

use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps};
use crate::recall::RecalledTx;
use crate::tx::{TxCall, TxOpts};
use alloy_primitives::TxKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct RecallMode;

impl RecallMode {
    pub fn replay_call(original: &RecalledTx) -> TxCall {
        TxCall {
            to: original.to.map_or(TxKind::Create, TxKind::Call),
            input: original.input.clone(),
            value: original.value,
            gas_limit: Some(original.gas_limit),
            call_block: original.block_number,
        }
    }
}

#[async_trait]
impl LoadTestMode for RecallMode {
    fn name(&self) -> &'static str {
        "recall"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["R"]
    }

    fn requires_recall(&self) -> bool {
        true
    }

    async fn init(&self, deps: &ModeDeps, _token: &CancellationToken) -> Result<()> {
        let recall = deps.recall()?;
        anyhow::ensure!(
            !recall.is_empty(),
            "no transactions to recall in the last {} blocks",
            deps.config.recall_length
        );
        Ok(())
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            let original = deps
                .with_rng(|rng| deps.recall().map(|r| r.random_transaction(rng).cloned()))?
                .context("recall index is empty")?;
            debug!(original = %original.hash, "Replaying transaction");

            let mut opts = opts.clone();
            if original.is_legacy_priced() {
                opts.fees = opts.fees.as_legacy();
            }
            deps.submit(Self::replay_call(&original), &opts).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, Bytes, U256};

    #[test]
    fn test_replay_keeps_call_fields() {
        let original = RecalledTx {
            hash: B256::with_last_byte(1),
            from: Address::with_last_byte(2),
            to: Some(Address::with_last_byte(3)),
            value: U256::from(5u64),
            input: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb, 0x00]),
            gas_limit: 90_000,
            tx_type: 2,
            block_number: Some(77),
        };
        let call = RecallMode::replay_call(&original);
        assert_eq!(call.to, TxKind::Call(Address::with_last_byte(3)));
        assert_eq!(call.input, original.input);
        assert_eq!(call.value, original.value);
        assert_eq!(call.gas_limit, Some(90_000));
        assert_eq!(call.call_block, Some(77));

        let creation = RecalledTx { to: None, ..original };
        assert_eq!(RecallMode::replay_call(&creation).to, TxKind::Create);
    }
}
