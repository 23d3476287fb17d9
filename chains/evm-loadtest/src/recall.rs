//! Recall Index - recent chain activity for replay and read load
//!
//! Built once at startup from the last `recall_length` blocks. The `recall`
//! mode replays its transactions; the `rpc` mode draws block numbers,
//! hashes, addresses and contracts from it.

use crate::client::EvmClient;
use alloy::consensus::Transaction as _;
use alloy::eips::Typed2718 as _;
use alloy::network::TransactionResponse;
use alloy::rpc::types::{Block, Transaction};
use alloy_primitives::{Address, B256, Bytes, U256};
use anyhow::Result;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::hash::Hash;
use tracing::info;

/// `balanceOf(address)`, marks ERC20 contracts.
pub const ERC20_BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
/// `tokenURI(uint256)`, marks ERC721 contracts.
pub const ERC721_TOKEN_URI_SELECTOR: [u8; 4] = [0xc8, 0x7b, 0x56, 0xdd];

/// The fields of a historical transaction needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalledTx {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub tx_type: u8,
    pub block_number: Option<u64>,
}

impl RecalledTx {
    pub fn from_rpc(tx: &Transaction) -> Self {
        Self {
            hash: tx.tx_hash(),
            from: TransactionResponse::from(tx),
            to: tx.to(),
            value: tx.value(),
            input: tx.input().clone(),
            gas_limit: tx.gas_limit(),
            tx_type: tx.ty(),
            block_number: tx.block_number,
        }
    }

    /// Type-0 and type-1 transactions carry a single gas price.
    pub fn is_legacy_priced(&self) -> bool {
        self.tx_type < 2
    }

    fn selector(&self) -> Option<[u8; 4]> {
        self.input.get(..4).and_then(|s| s.try_into().ok())
    }
}

#[derive(Debug, Default)]
struct Dedup<T> {
    seen: HashSet<T>,
    items: Vec<T>,
}

impl<T: Copy + Eq + Hash> Dedup<T> {
    fn push(&mut self, item: T) {
        if self.seen.insert(item) {
            self.items.push(item);
        }
    }
}

/// Deduplicated activity seen in a window of blocks.
#[derive(Debug, Clone, Default)]
pub struct RecallIndex {
    block_numbers: Vec<u64>,
    block_hashes: Vec<B256>,
    tx_hashes: Vec<B256>,
    addresses: Vec<Address>,
    erc20_addresses: Vec<Address>,
    erc721_addresses: Vec<Address>,
    contracts: Vec<Address>,
    transactions: Vec<RecalledTx>,
}

impl RecallIndex {
    /// Builds the index from `(number, hash)` pairs and the transactions of
    /// those blocks.
    pub fn from_parts(
        blocks: impl IntoIterator<Item = (u64, B256)>,
        transactions: Vec<RecalledTx>,
    ) -> Self {
        let mut numbers = Dedup::default();
        let mut block_hashes = Dedup::default();
        for (number, hash) in blocks {
            numbers.push(number);
            block_hashes.push(hash);
        }

        let mut tx_hashes = Dedup::default();
        let mut addresses = Dedup::default();
        let mut erc20 = Dedup::default();
        let mut erc721 = Dedup::default();
        let mut contracts = Dedup::default();
        for tx in &transactions {
            tx_hashes.push(tx.hash);
            addresses.push(tx.from);
            let Some(to) = tx.to else { continue };
            addresses.push(to);
            match tx.selector() {
                Some(ERC20_BALANCE_OF_SELECTOR) => erc20.push(to),
                Some(ERC721_TOKEN_URI_SELECTOR) => erc721.push(to),
                _ => {}
            }
            if tx.input.len() > 4 {
                contracts.push(to);
            }
        }

        Self {
            block_numbers: numbers.items,
            block_hashes: block_hashes.items,
            tx_hashes: tx_hashes.items,
            addresses: addresses.items,
            erc20_addresses: erc20.items,
            erc721_addresses: erc721.items,
            contracts: contracts.items,
            transactions,
        }
    }

    pub fn from_blocks(blocks: &[Block]) -> Self {
        let pairs = blocks.iter().map(|b| (b.header.number, b.header.hash));
        let transactions = blocks
            .iter()
            .flat_map(|b| b.transactions.txns())
            .map(RecalledTx::from_rpc)
            .collect();
        Self::from_parts(pairs, transactions)
    }

    /// Fetches the last `length` blocks ending at `head`, `batch_size` at a
    /// time.
    pub async fn fetch(client: &EvmClient, head: u64, length: u64, batch_size: u64) -> Result<Self> {
        let from = head.saturating_sub(length.saturating_sub(1));
        info!(from, to = head, "📚 Fetching blocks for the recall index");
        let blocks = client.blocks_with_transactions(from, head, batch_size).await?;
        let index = Self::from_blocks(&blocks);
        info!(
            blocks = index.block_numbers.len(),
            transactions = index.transactions.len(),
            addresses = index.addresses.len(),
            erc20 = index.erc20_addresses.len(),
            erc721 = index.erc721_addresses.len(),
            contracts = index.contracts.len(),
            "Recall index ready"
        );
        Ok(index)
    }

    /// Adds the run's own token contracts to token lists that came out
    /// empty, so token reads have a target on chains without token traffic.
    pub fn backfill_tokens(&mut self, erc20: Option<Address>, erc721: Option<Address>) {
        if let (true, Some(address)) = (self.erc20_addresses.is_empty(), erc20) {
            self.erc20_addresses.push(address);
        }
        if let (true, Some(address)) = (self.erc721_addresses.is_empty(), erc721) {
            self.erc721_addresses.push(address);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn transactions(&self) -> &[RecalledTx] {
        &self.transactions
    }

    pub fn block_numbers(&self) -> &[u64] {
        &self.block_numbers
    }

    pub fn block_hashes(&self) -> &[B256] {
        &self.block_hashes
    }

    pub fn tx_hashes(&self) -> &[B256] {
        &self.tx_hashes
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn erc20_addresses(&self) -> &[Address] {
        &self.erc20_addresses
    }

    pub fn erc721_addresses(&self) -> &[Address] {
        &self.erc721_addresses
    }

    pub fn contracts(&self) -> &[Address] {
        &self.contracts
    }

    pub fn random_transaction<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&RecalledTx> {
        self.transactions.choose(rng)
    }

    pub fn random_block_number<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u64> {
        self.block_numbers.choose(rng).copied()
    }

    pub fn random_block_hash<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<B256> {
        self.block_hashes.choose(rng).copied()
    }

    pub fn random_tx_hash<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<B256> {
        self.tx_hashes.choose(rng).copied()
    }

    pub fn random_address<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Address> {
        self.addresses.choose(rng).copied()
    }

    pub fn random_erc20_address<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Address> {
        self.erc20_addresses.choose(rng).copied()
    }

    pub fn random_erc721_address<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Address> {
        self.erc721_addresses.choose(rng).copied()
    }

    pub fn random_contract<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Address> {
        self.contracts.choose(rng).copied()
    }
}
