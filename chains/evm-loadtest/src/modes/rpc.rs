//! RPC Mode - weighted random read load
//!
//! Each request rolls a number below 300 and issues the matching read,
//! using the recall index for realistic block numbers, hashes and
//! addresses:
//!
//! | Roll | Call | Weight |
//! |------|------|--------|
//! | 0-9 | `eth_gasPrice` | 10 |
//! | 10-20 | `eth_estimateGas` of a recent tx | 11 |
//! | 21-32 | `eth_getTransactionCount` | 12 |
//! | 33-46 | `eth_getCode` | 14 |
//! | 47-63 | `eth_getBlockByNumber` | 17 |
//! | 64-83 | `eth_getTransactionByHash` | 20 |
//! | 84-108 | `eth_getBalance` | 25 |
//! | 109-141 | `eth_getTransactionReceipt` | 33 |
//! | 142-191 | `eth_getLogs` by block hash | 50 |
//! | 192-299 | `eth_call` balanceOf on a token | 108 |
//!
//! Nothing is signed and no hash is returned. The ERC20 and ERC721
//! contracts of the run are added to the recall index when the recent
//! blocks show no token of that kind.

use crate::contracts::{IERC20, IERC721};
use crate::modes::{ExecOutcome, LoadTestMode, ModeDeps, RecallMode};
use crate::recall::RecallIndex;
use crate::tx::{TxCall, TxOpts};
use alloy_primitives::{Address, B256};
use alloy_sol_types::SolCall;
use anyhow::{Context, Result};
use async_trait::async_trait;
use loadtest_core::gas::StandardGasLimits;
use rand::Rng;
use tracing::{trace, warn};

const TOTAL_WEIGHT: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCall {
    GasPrice,
    EstimateGas,
    Nonce,
    Code,
    BlockByNumber,
    TransactionByHash,
    Balance,
    Receipt,
    Logs,
    TokenBalance,
}

impl RpcCall {
    pub fn from_roll(roll: u32) -> Self {
        match roll {
            0..10 => RpcCall::GasPrice,
            10..21 => RpcCall::EstimateGas,
            21..33 => RpcCall::Nonce,
            33..47 => RpcCall::Code,
            47..64 => RpcCall::BlockByNumber,
            64..84 => RpcCall::TransactionByHash,
            84..109 => RpcCall::Balance,
            109..142 => RpcCall::Receipt,
            142..192 => RpcCall::Logs,
            _ => RpcCall::TokenBalance,
        }
    }
}

/// One read with its inputs drawn from the recall index.
#[derive(Debug, Clone)]
pub enum RpcRequest {
    GasPrice,
    /// A block below the head at request time.
    RandomBlock,
    EstimateGas { call: TxCall, from: Address },
    Nonce(Address),
    Code(Address),
    Balance(Address),
    TransactionByHash(B256),
    Receipt(B256),
    Logs { block_hash: B256 },
    /// `balanceOf(owner)` calls, one per token.
    TokenBalances { owner: Address, calls: Vec<TxCall> },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RpcMode;

impl RpcMode {
    /// Draws the inputs of `call`. `None` when the index holds no token to
    /// read a balance from.
    pub fn plan(
        call: RpcCall,
        recall: &RecallIndex,
        owner: Address,
        rng: &mut impl Rng,
    ) -> Result<Option<RpcRequest>> {
        let missing = |what: &str| format!("recall index has no {}", what);
        let request = match call {
            RpcCall::GasPrice => RpcRequest::GasPrice,
            RpcCall::BlockByNumber => RpcRequest::RandomBlock,
            RpcCall::EstimateGas => {
                let tx = recall
                    .random_transaction(rng)
                    .with_context(|| missing("transactions"))?;
                let mut call = RecallMode::replay_call(tx);
                call.gas_limit = None;
                RpcRequest::EstimateGas { call, from: tx.from }
            }
            RpcCall::Nonce | RpcCall::Code | RpcCall::Balance => {
                let address = recall
                    .random_address(rng)
                    .with_context(|| missing("addresses"))?;
                match call {
                    RpcCall::Nonce => RpcRequest::Nonce(address),
                    RpcCall::Code => RpcRequest::Code(address),
                    _ => RpcRequest::Balance(address),
                }
            }
            RpcCall::TransactionByHash | RpcCall::Receipt => {
                let hash = recall
                    .random_tx_hash(rng)
                    .with_context(|| missing("transaction hashes"))?;
                if call == RpcCall::Receipt {
                    RpcRequest::Receipt(hash)
                } else {
                    RpcRequest::TransactionByHash(hash)
                }
            }
            RpcCall::Logs => RpcRequest::Logs {
                block_hash: recall
                    .random_block_hash(rng)
                    .with_context(|| missing("block hashes"))?,
            },
            RpcCall::TokenBalance => {
                let mut calls = Vec::with_capacity(2);
                if let Some(token) = recall.random_erc20_address(rng) {
                    let input = IERC20::balanceOfCall { account: owner }.abi_encode();
                    calls.push(TxCall::call(token, input));
                }
                if let Some(nft) = recall.random_erc721_address(rng) {
                    let input = IERC721::balanceOfCall { owner }.abi_encode();
                    calls.push(TxCall::call(nft, input));
                }
                if calls.is_empty() {
                    return Ok(None);
                }
                RpcRequest::TokenBalances { owner, calls }
            }
        };
        Ok(Some(request))
    }

    async fn perform(deps: &ModeDeps, request: RpcRequest) -> Result<()> {
        let client = &deps.client;
        match request {
            RpcRequest::GasPrice => {
                client.gas_price().await?;
            }
            RpcRequest::RandomBlock => {
                let head = client.block_number().await?;
                let number = if head == 0 {
                    0
                } else {
                    deps.with_rng(|rng| rng.gen_range(0..head))
                };
                client.block(number).await?;
            }
            RpcRequest::EstimateGas { call, from } => {
                client.estimate_gas(call.to_request(from)).await?;
            }
            RpcRequest::Nonce(address) => {
                client.latest_nonce(address).await?;
            }
            RpcRequest::Code(address) => {
                client.code(address).await?;
            }
            RpcRequest::Balance(address) => {
                client.balance(address).await?;
            }
            RpcRequest::TransactionByHash(hash) => {
                client.transaction_by_hash(hash).await?;
            }
            RpcRequest::Receipt(hash) => {
                client.receipt(hash).await?;
            }
            RpcRequest::Logs { block_hash } => {
                client.logs_by_block_hash(block_hash).await?;
            }
            RpcRequest::TokenBalances { owner, calls } => {
                for call in calls {
                    client.call(call.to_request(owner), None).await?;
                }
            }
        }
        Ok(())
    }

    async fn run(deps: &ModeDeps, opts: &TxOpts) -> Result<()> {
        let Some(recall) = deps.recall.as_deref() else {
            return Ok(());
        };
        let (call, request) = deps.with_rng(|rng| {
            let call = RpcCall::from_roll(rng.gen_range(0..TOTAL_WEIGHT));
            Self::plan(call, recall, opts.from(), rng).map(|request| (call, request))
        })?;
        let Some(request) = request else {
            warn!("No ERC20 or ERC721 contracts in the recall index");
            return Ok(());
        };
        trace!(?call, "RPC read");
        Self::perform(deps, request).await
    }
}

#[async_trait]
impl LoadTestMode for RpcMode {
    fn name(&self) -> &'static str {
        "rpc"
    }

    fn requires_erc20(&self) -> bool {
        true
    }

    fn requires_erc721(&self) -> bool {
        true
    }

    fn requires_recall(&self) -> bool {
        true
    }

    fn gas_limit_hint(&self, _limits: &StandardGasLimits) -> u64 {
        0
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome {
        ExecOutcome::timed(async {
            Self::run(deps, opts).await?;
            Ok(None)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::TxKind;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    #[test]
    fn test_roll_boundaries() {
        assert_eq!(RpcCall::from_roll(0), RpcCall::GasPrice);
        assert_eq!(RpcCall::from_roll(9), RpcCall::GasPrice);
        assert_eq!(RpcCall::from_roll(10), RpcCall::EstimateGas);
        assert_eq!(RpcCall::from_roll(33), RpcCall::Code);
        assert_eq!(RpcCall::from_roll(141), RpcCall::Receipt);
        assert_eq!(RpcCall::from_roll(142), RpcCall::Logs);
        assert_eq!(RpcCall::from_roll(191), RpcCall::Logs);
        assert_eq!(RpcCall::from_roll(192), RpcCall::TokenBalance);
        assert_eq!(RpcCall::from_roll(299), RpcCall::TokenBalance);
    }

    #[test]
    fn test_token_balance_reads_backfilled_tokens() {
        let erc20 = Address::with_last_byte(0x20);
        let erc721 = Address::with_last_byte(0x21);
        let owner = Address::with_last_byte(0x01);
        let mut rng = StdRng::seed_from_u64(3);

        let mut index = RecallIndex::default();
        assert!(
            RpcMode::plan(RpcCall::TokenBalance, &index, owner, &mut rng)
                .unwrap()
                .is_none()
        );

        index.backfill_tokens(Some(erc20), Some(erc721));
        let request = RpcMode::plan(RpcCall::TokenBalance, &index, owner, &mut rng)
            .unwrap()
            .unwrap();
        let (from, calls) = match request {
            RpcRequest::TokenBalances { owner, calls } => (owner, calls),
            other => panic!("expected token balance calls, got {:?}", other),
        };
        assert_eq!(from, owner);
        let targets: Vec<_> = calls.iter().map(|c| c.to).collect();
        assert_eq!(targets, [TxKind::Call(erc20), TxKind::Call(erc721)]);
        for call in &calls {
            assert_eq!(call.input[..4], [0x70, 0xa0, 0x82, 0x31]);
            assert_eq!(&call.input[16..36], owner.as_slice());
        }
    }

    #[test]
    fn test_empty_index_reports_what_is_missing() {
        let index = RecallIndex::default();
        let mut rng = StdRng::seed_from_u64(3);
        let err = RpcMode::plan(RpcCall::Logs, &index, Address::ZERO, &mut rng).unwrap_err();
        assert!(err.to_string().contains("block hashes"));
        assert!(matches!(
            RpcMode::plan(RpcCall::GasPrice, &index, Address::ZERO, &mut rng).unwrap(),
            Some(RpcRequest::GasPrice)
        ));
    }

    #[test]
    fn test_weights_sum_to_total() {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for roll in 0..TOTAL_WEIGHT {
            *counts
                .entry(format!("{:?}", RpcCall::from_roll(roll)))
                .or_default() += 1;
        }
        assert_eq!(counts["GasPrice"], 10);
        assert_eq!(counts["EstimateGas"], 11);
        assert_eq!(counts["Nonce"], 12);
        assert_eq!(counts["Code"], 14);
        assert_eq!(counts["BlockByNumber"], 17);
        assert_eq!(counts["TransactionByHash"], 20);
        assert_eq!(counts["Balance"], 25);
        assert_eq!(counts["Receipt"], 33);
        assert_eq!(counts["Logs"], 50);
        assert_eq!(counts["TokenBalance"], 108);
    }
}
