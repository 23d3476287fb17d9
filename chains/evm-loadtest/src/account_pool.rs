//! Account Pool - Signing accounts with per-account nonce counters
//!
//! Workers never ask the node for a nonce while the test runs. Each account
//! fetches its pending nonce once at startup and hands out consecutive values
//! from an atomic counter afterwards.
//!
//! # Sources
//!
//! - **Single account**: the configured private key, shared by all workers
//! - **Key file**: one hex private key per line (`#` comments allowed)
//! - **Seed-derived**: `count` keys generated from the run seed, funded by
//!   the main key
//!
//! # Nonce Invariants
//!
//! - A counter only moves forward, and only when a nonce is issued.
//! - After `n` issues an account's counter equals `start + n`.
//! - A nonce is never issued twice, even when its transaction is rejected.

use crate::client::EvmClient;
use crate::contracts::{MULTICALL3_ADDRESS, Multicall3};
use crate::receipts::await_receipt;
use crate::tx::{ChainParams, FeeParams, TRANSFER_GAS, TxCall, sign_call};
use alloy::network::ReceiptResponse as _;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolCall;
use anyhow::{Context, Result};
use futures::future::join_all;
use loadtest_core::RetryConfig;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// A signing key plus its nonce counter.
pub struct Account {
    signer: PrivateKeySigner,
    address: Address,
    start_nonce: AtomicU64,
    next_nonce: AtomicU64,
    funded: OnceCell<()>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("next_nonce", &self.next_nonce.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Account {
    pub fn new(signer: PrivateKeySigner) -> Self {
        let address = signer.address();
        Self {
            signer,
            address,
            start_nonce: AtomicU64::new(0),
            next_nonce: AtomicU64::new(0),
            funded: OnceCell::new(),
        }
    }

    pub fn from_hex(private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .context("Failed to parse private key")?;
        Ok(Self::new(signer))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    /// Resets both the starting nonce and the counter. Only meant for init.
    pub fn set_start_nonce(&self, nonce: u64) {
        self.start_nonce.store(nonce, Ordering::Release);
        self.next_nonce.store(nonce, Ordering::Release);
    }

    pub fn start_nonce(&self) -> u64 {
        self.start_nonce.load(Ordering::Acquire)
    }

    /// The nonce the next issue will return.
    pub fn next_nonce(&self) -> u64 {
        self.next_nonce.load(Ordering::Acquire)
    }

    pub fn issue_nonce(&self) -> u64 {
        self.next_nonce.fetch_add(1, Ordering::AcqRel)
    }

    /// How many nonces were handed out since init.
    pub fn issued(&self) -> u64 {
        self.next_nonce() - self.start_nonce()
    }

    /// Loads the pending nonce from the node as the starting nonce.
    pub async fn sync_nonce(&self, client: &EvmClient) -> Result<u64> {
        let nonce = client.pending_nonce(self.address).await?;
        self.set_start_nonce(nonce);
        Ok(nonce)
    }

    pub fn is_funded(&self) -> bool {
        self.funded.initialized()
    }

    fn mark_funded(&self) {
        let _ = self.funded.set(());
    }

    /// Sends `amount` from `driver` the first time this account is used.
    /// Concurrent callers wait for that single funding transaction.
    pub async fn ensure_funded(
        &self,
        client: &EvmClient,
        driver: &Account,
        amount: U256,
        chain: ChainParams,
        fees: FeeParams,
        token: &CancellationToken,
    ) -> Result<()> {
        self.funded
            .get_or_try_init(|| async {
                let balance = client.balance(self.address).await?;
                if balance >= amount {
                    return Ok(());
                }
                let call = TxCall::transfer(self.address, amount);
                let hash = driver.send(client, call, chain, fees).await?;
                let retry = RetryConfig::new(60, 500).with_max_delay(5_000);
                let receipt = await_receipt(client, hash, retry, token).await?;
                anyhow::ensure!(receipt.status(), "funding transaction {} reverted", hash);
                debug!(account = %self.address, %hash, "Funded on first use");
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Signs and submits `call` with this account's next nonce. Gas is
    /// estimated before the nonce is taken so a failed estimate leaves no
    /// gap.
    pub async fn send(
        &self,
        client: &EvmClient,
        call: TxCall,
        chain: ChainParams,
        fees: FeeParams,
    ) -> Result<B256> {
        let gas_limit = match call.gas_limit {
            Some(limit) => limit,
            None => client.estimate_gas(call.to_request(self.address)).await?,
        };
        let nonce = self.issue_nonce();
        let signed = sign_call(&self.signer, &call, nonce, chain.chain_id, fees, gas_limit)?;
        client
            .send_raw(&signed.raw)
            .await
            .with_context(|| format!("Failed to submit transaction with nonce {}", nonce))
    }

    fn private_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("0x{}", hex::encode(self.signer.to_bytes())))
    }
}

/// One-time funding settings.
#[derive(Debug, Clone, Copy)]
pub struct FundingPlan {
    pub amount: U256,
    pub accounts_per_tx: u64,
    pub check_balance: bool,
}

#[derive(Serialize)]
struct DumpedAccount<'a> {
    address: Address,
    #[serde(rename = "privateKey")]
    private_key: &'a str,
}

/// The accounts workers send from.
#[derive(Debug, Clone)]
pub struct AccountPool {
    accounts: Vec<Arc<Account>>,
}

impl AccountPool {
    /// Builds a pool, keeping the first of several accounts with the same
    /// address so every address has one nonce counter.
    pub fn new(accounts: Vec<Arc<Account>>) -> Result<Self> {
        anyhow::ensure!(!accounts.is_empty(), "account pool cannot be empty");
        let given = accounts.len();
        let mut seen = HashSet::with_capacity(given);
        let accounts: Vec<_> = accounts
            .into_iter()
            .filter(|account| seen.insert(account.address()))
            .collect();
        if accounts.len() < given {
            warn!(
                duplicates = given - accounts.len(),
                "Dropped duplicate sending accounts"
            );
        }
        Ok(Self { accounts })
    }

    /// Replaces the pool's account with the address of `shared` by
    /// `shared` itself, so both hand out nonces from one counter.
    pub fn share_account(mut self, shared: &Arc<Account>) -> Self {
        for account in &mut self.accounts {
            if account.address() == shared.address() && !Arc::ptr_eq(account, shared) {
                debug!(account = %shared.address(), "Sending account is the main account");
                *account = shared.clone();
            }
        }
        self
    }

    /// All workers share `account`.
    pub fn single(account: Arc<Account>) -> Self {
        Self {
            accounts: vec![account],
        }
    }

    /// Generates `count` keys from `seed`. The same seed always yields the
    /// same accounts.
    pub fn derive_from_seed(seed: u64, count: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut accounts = Vec::with_capacity(count as usize);
        while (accounts.len() as u64) < count {
            let mut bytes = Zeroizing::new([0u8; 32]);
            rng.fill_bytes(bytes.as_mut());
            // Out-of-range scalars are vanishingly rare; draw again.
            if let Ok(signer) = PrivateKeySigner::from_bytes(&B256::from(*bytes)) {
                accounts.push(Arc::new(Account::new(signer)));
            }
        }
        Self::new(accounts)
    }

    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = Zeroizing::new(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read key file {}", path.display()))?,
        );
        let accounts = Self::parse_keys(&content)?
            .into_iter()
            .map(|signer| Arc::new(Account::new(signer)))
            .collect();
        Self::new(accounts).with_context(|| format!("No keys found in {}", path.display()))
    }

    /// One key per line; blank lines and `#` comments are skipped.
    pub fn parse_keys(content: &str) -> Result<Vec<PrivateKeySigner>> {
        content
            .lines()
            .enumerate()
            .map(|(i, line)| (i, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .map(|(i, line)| {
                line.parse::<PrivateKeySigner>()
                    .with_context(|| format!("Invalid private key on line {}", i + 1))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn accounts(&self) -> &[Arc<Account>] {
        &self.accounts
    }

    /// Account for request `index`, round-robin over the pool.
    pub fn pick(&self, index: u64) -> &Arc<Account> {
        &self.accounts[(index % self.accounts.len() as u64) as usize]
    }

    /// Fetches every account's pending nonce.
    pub async fn sync_nonces(&self, client: &EvmClient) -> Result<()> {
        let results = join_all(self.accounts.iter().map(|a| a.sync_nonce(client))).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Total nonces issued across the pool.
    pub fn total_issued(&self) -> u64 {
        self.accounts.iter().map(|a| a.issued()).sum()
    }

    /// Writes one `{"address", "privateKey"}` object per line.
    pub fn dump_ndjson(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        for account in &self.accounts {
            let key = account.private_key_hex();
            let line = serde_json::to_string(&DumpedAccount {
                address: account.address(),
                private_key: &key,
            })?;
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;
        info!(path = %path.display(), accounts = self.accounts.len(), "Dumped sending accounts");
        Ok(())
    }

    /// Sends `plan.amount` from `driver` to every other account in the pool
    /// and waits for all funding receipts. On failure the already funded
    /// accounts are refunded and an error is returned.
    pub async fn fund(
        &self,
        client: &EvmClient,
        driver: &Account,
        plan: FundingPlan,
        chain: ChainParams,
        fees: FeeParams,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut targets = Vec::new();
        for account in self.accounts.iter().filter(|a| a.address() != driver.address()) {
            if plan.check_balance {
                let balance = client.balance(account.address()).await?;
                if balance >= plan.amount {
                    debug!(account = %account.address(), %balance, "Already funded, skipping");
                    continue;
                }
            }
            targets.push(account.address());
        }
        if targets.is_empty() {
            self.accounts.iter().for_each(|a| a.mark_funded());
            info!("All sending accounts already funded");
            return Ok(());
        }

        let use_multicall = plan.accounts_per_tx > 1 && client.has_code(MULTICALL3_ADDRESS).await?;
        info!(
            accounts = targets.len(),
            amount = %plan.amount,
            multicall = use_multicall,
            "💰 Funding sending accounts"
        );

        let mut hashes = Vec::new();
        if use_multicall {
            for chunk in targets.chunks(plan.accounts_per_tx as usize) {
                let calls = chunk
                    .iter()
                    .map(|target| Multicall3::Call3Value {
                        target: *target,
                        allowFailure: false,
                        value: plan.amount,
                        callData: Default::default(),
                    })
                    .collect();
                let input = Multicall3::aggregate3ValueCall { calls }.abi_encode();
                let total = plan.amount * U256::from(chunk.len());
                let call = TxCall::call(MULTICALL3_ADDRESS, input).with_value(total);
                hashes.push(driver.send(client, call, chain, fees).await?);
            }
        } else {
            for target in &targets {
                let call = TxCall::transfer(*target, plan.amount);
                hashes.push(driver.send(client, call, chain, fees).await?);
            }
        }

        let retry = RetryConfig::new(60, 500).with_max_delay(5_000);
        let receipts = join_all(
            hashes
                .iter()
                .map(|hash| await_receipt(client, *hash, retry, token)),
        )
        .await;

        let mut failed = 0usize;
        for (hash, receipt) in hashes.iter().zip(receipts) {
            match receipt {
                Ok(receipt) if receipt.status() => {}
                Ok(_) => {
                    warn!(%hash, "Funding transaction reverted");
                    failed += 1;
                }
                Err(e) => {
                    warn!(%hash, error = %e, "Funding transaction not confirmed");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            warn!("Funding failed, returning funds to the main account");
            if let Err(e) = self.refund(client, driver.address(), chain, fees, token).await {
                warn!(error = %e, "Refund after failed funding did not complete");
            }
            anyhow::bail!("{} funding transaction(s) failed", failed);
        }

        for account in self.accounts.iter() {
            account.mark_funded();
        }
        info!(accounts = targets.len(), "✅ Sending accounts funded");
        Ok(())
    }

    /// Sends what is left on every account, minus the transfer cost, back to
    /// `recipient`.
    pub async fn refund(
        &self,
        client: &EvmClient,
        recipient: Address,
        chain: ChainParams,
        fees: FeeParams,
        token: &CancellationToken,
    ) -> Result<()> {
        let cost = U256::from(TRANSFER_GAS) * U256::from(fees.max_price());
        let mut hashes = Vec::new();
        for account in self.accounts.iter().filter(|a| a.address() != recipient) {
            let balance = client.balance(account.address()).await?;
            if balance <= cost {
                debug!(account = %account.address(), %balance, "Nothing to refund");
                continue;
            }
            let call = TxCall::transfer(recipient, balance - cost);
            match account.send(client, call, chain, fees).await {
                Ok(hash) => hashes.push(hash),
                Err(e) => warn!(account = %account.address(), error = %e, "Refund failed"),
            }
        }

        let retry = RetryConfig::new(30, 500).with_max_delay(5_000);
        let receipts = join_all(
            hashes
                .iter()
                .map(|hash| await_receipt(client, *hash, retry, token)),
        )
        .await;
        let confirmed = receipts.iter().filter(|r| r.is_ok()).count();
        info!(sent = hashes.len(), confirmed, "💸 Refunded sending accounts");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_start_nonce_resets_counter() {
        let account = Account::new(PrivateKeySigner::from_bytes(&B256::with_last_byte(9)).unwrap());
        account.set_start_nonce(10);
        assert_eq!(account.issue_nonce(), 10);
        assert_eq!(account.issue_nonce(), 11);
        assert_eq!(account.issued(), 2);

        account.set_start_nonce(3);
        assert_eq!(account.next_nonce(), 3);
        assert_eq!(account.issued(), 0);
    }

    #[test]
    fn test_debug_output_hides_key() {
        let account = Account::from_hex(
            "0x42b6e34dc21598a807dc19d7784c71b2a7a01f6480dc6f58258f78e539f1a1fa",
        )
        .unwrap();
        let debug = format!("{:?}", account);
        assert!(debug.contains("address"));
        assert!(!debug.contains("42b6e34d"));
    }

    #[test]
    fn test_pick_is_round_robin() {
        let pool = AccountPool::derive_from_seed(5, 3).unwrap();
        assert_eq!(pool.pick(0).address(), pool.pick(3).address());
        assert_eq!(pool.pick(1).address(), pool.pick(4).address());
        assert_ne!(pool.pick(0).address(), pool.pick(1).address());
    }
}
