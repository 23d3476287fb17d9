//! Blob Mode
//!
//! Sends EIP-4844 transactions carrying one blob of random bytes to the
//! configured recipient. `blob_fee_cap` (gwei) caps the blob gas price.

use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps};
use crate::tx::{BlobParams, TxOpts, sign_blob};
use alloy_primitives::U256;
use async_trait::async_trait;
use loadtest_core::gas::{StandardGasLimits, gwei_to_wei};
use rand::RngCore;

/// Fits in a single blob once encoded.
const BLOB_PAYLOAD_SIZE: usize = 100_000;
const BLOB_TX_GAS: u64 = 21_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct BlobMode;

#[async_trait]
impl LoadTestMode for BlobMode {
    fn name(&self) -> &'static str {
        "blob"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["b"]
    }

    fn gas_limit_hint(&self, limits: &StandardGasLimits) -> u64 {
        limits.transfer
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            let payload = deps.with_rng(|rng| {
                let mut payload = vec![0u8; BLOB_PAYLOAD_SIZE];
                rng.fill_bytes(&mut payload);
                payload
            });
            let params = BlobParams {
                to: deps.recipient(),
                value: U256::from(deps.config.eth_amount_in_wei),
                max_fee_per_blob_gas: gwei_to_wei(deps.config.blob_fee_cap),
                payload,
            };
            let signed = sign_blob(
                opts.account.signer(),
                &params,
                opts.nonce,
                opts.chain_id,
                opts.fees,
                opts.gas_limit.unwrap_or(BLOB_TX_GAS),
            )?;
            deps.dispatch(signed).await
        })
        .await
    }
}
