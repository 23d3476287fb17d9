//! Store Mode
//!
//! Calls `LoadTester.store(bytes)` with `store_data_size` bytes built from
//! well-known 4-byte hexwords, so the payload is recognisable in traces
//! while still varying between requests.

use crate::contracts::LoadTester;
use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps};
use crate::tx::{TxCall, TxOpts};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;

const HEXWORDS: [[u8; 4]; 43] = [
    [0x00, 0x0f, 0xf1, 0xce],
    [0x00, 0xba, 0xb1, 0x0c],
    [0x1b, 0xad, 0xb0, 0x02],
    [0x8b, 0xad, 0xf0, 0x0d],
    [0xab, 0xad, 0xba, 0xbe],
    [0xb1, 0x05, 0xf0, 0x0d],
    [0xb1, 0x6b, 0x00, 0xb5],
    [0x0b, 0x00, 0xb1, 0x35],
    [0xba, 0xaa, 0xaa, 0xad],
    [0xba, 0xad, 0xf0, 0x0d],
    [0xba, 0xd2, 0x22, 0x22],
    [0xba, 0xdd, 0xca, 0xfe],
    [0xca, 0xfe, 0xb0, 0xba],
    [0xb0, 0xba, 0xba, 0xbe],
    [0xbe, 0xef, 0xba, 0xbe],
    [0xc0, 0x00, 0x10, 0xff],
    [0xca, 0xfe, 0xba, 0xbe],
    [0xca, 0xfe, 0xd0, 0x0d],
    [0xce, 0xfa, 0xed, 0xfe],
    [0x0d, 0x15, 0xea, 0x5e],
    [0xda, 0xbb, 0xad, 0x00],
    [0xde, 0xad, 0x2b, 0xad],
    [0xde, 0xad, 0xba, 0xad],
    [0xde, 0xad, 0xba, 0xbe],
    [0xde, 0xad, 0xbe, 0xaf],
    [0xde, 0xad, 0xbe, 0xef],
    [0xde, 0xad, 0xc0, 0xde],
    [0xde, 0xad, 0xde, 0xad],
    [0xde, 0xad, 0xd0, 0x0d],
    [0xde, 0xad, 0xfa, 0x11],
    [0xde, 0xad, 0x10, 0xcc],
    [0xde, 0xad, 0xfe, 0xed],
    [0xde, 0xca, 0xfb, 0xad],
    [0xde, 0xfe, 0xc8, 0xed],
    [0xd0, 0xd0, 0xca, 0xca],
    [0xe0, 0x11, 0xcf, 0xd0],
    [0xfa, 0xce, 0xfe, 0xed],
    [0xfb, 0xad, 0xbe, 0xef],
    [0xfe, 0xe1, 0xde, 0xad],
    [0xfe, 0xed, 0xba, 0xbe],
    [0xfe, 0xed, 0xc0, 0xde],
    [0xff, 0xba, 0xdd, 0x11],
    [0xf0, 0x0d, 0xba, 0xbe],
];

/// `size` bytes of randomly chosen hexwords; the last word is truncated
/// when `size` is not a multiple of 4.
pub fn hexword_payload<R: Rng + ?Sized>(rng: &mut R, size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size + 4);
    while data.len() < size {
        if let Some(word) = HEXWORDS.choose(rng) {
            data.extend_from_slice(word);
        }
    }
    data.truncate(size);
    data
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreMode;

#[async_trait]
impl LoadTestMode for StoreMode {
    fn name(&self) -> &'static str {
        "store"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["s"]
    }

    fn requires_load_tester(&self) -> bool {
        true
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            let contract = deps.contracts.require_load_tester()?;
            let size = deps.config.store_data_size as usize;
            let data = deps.with_rng(|rng| hexword_payload(rng, size));
            let input = LoadTester::storeCall { data: data.into() }.abi_encode();
            deps.submit(TxCall::call(contract, input), opts).await
        })
        .await
    }
}
