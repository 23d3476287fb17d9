//! Modes Module - Request generators and their registry
//!
//! A mode produces exactly one request per [`LoadTestMode::execute`] call:
//! a signed transaction, an `eth_call`, or a plain RPC read. Workers pick
//! the mode, hand it a [`TxOpts`] with the sender, nonce and fees, and
//! record whatever [`ExecOutcome`] comes back.
//!
//! # Available Modes
//!
//! | Mode | Alias | Request |
//! |------|-------|---------|
//! | `transaction` | `t` | Value transfer |
//! | `deploy` | `d` | LoadTester deployment |
//! | `store` | `s` | `LoadTester.store` with hexword data |
//! | `increment` | `inc` | `LoadTester.inc` |
//! | `erc20` | `2` | ERC20 transfer of 1 unit |
//! | `erc721` | `7` | ERC721 `mintBatch(to, 1)` |
//! | `contract-call` | `cc` | User-supplied calldata |
//! | `recall` | `R` | Replay of a recent transaction |
//! | `rpc` | | Weighted random RPC read |
//! | `random` | `r` | One of the transaction-producing modes |
//! | `uniswapv3` | `v3` | `exactInputSingle` swap |
//! | `blob` | `b` | EIP-4844 transaction |
//!
//! # Terminal Behaviour
//!
//! [`ModeDeps::submit`] decides what happens to a prepared call:
//!
//! - **call only**: `eth_call` against the node, nothing is signed
//! - **raw output**: the signed transaction is printed to stdout
//! - otherwise: `eth_sendRawTransaction`
//!
//! # Adding a Mode
//!
//! Implement [`LoadTestMode`] and register it in
//! [`ModeRegistry::with_defaults`]. Alias lookup is case-sensitive so that
//! `r` and `R` can mean different modes; canonical names are not.

pub mod blob;
pub mod contract_call;
pub mod deploy;
pub mod erc20;
pub mod erc721;
pub mod increment;
pub mod random;
pub mod recall;
pub mod rpc;
pub mod store;
pub mod transaction;
pub mod uniswapv3;

pub use blob::BlobMode;
pub use contract_call::ContractCallMode;
pub use deploy::DeployMode;
pub use erc20::Erc20Mode;
pub use erc721::Erc721Mode;
pub use increment::IncrementMode;
pub use random::RandomMode;
pub use recall::RecallMode;
pub use rpc::RpcMode;
pub use store::StoreMode;
pub use transaction::TransactionMode;
pub use uniswapv3::UniswapV3Mode;

use crate::account_pool::{Account, AccountPool};
use crate::client::EvmClient;
use crate::contracts::{ContractNeeds, DeployedContracts};
use crate::fee_oracle::FeeOracle;
use crate::recall::RecallIndex;
use crate::tx::{ChainParams, SignedTx, TRANSFER_GAS, TxCall, TxOpts, sign_call};
use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use loadtest_core::gas::StandardGasLimits;
use loadtest_core::{ConfigError, LoadTestConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Result of one [`LoadTestMode::execute`] call.
#[derive(Debug)]
pub struct ExecOutcome {
    pub start: Instant,
    pub end: Instant,
    /// Set when a transaction reached the node.
    pub hash: Option<B256>,
    pub error: Option<anyhow::Error>,
}

impl ExecOutcome {
    /// Runs `request` and stamps its start and end.
    pub async fn timed<F>(request: F) -> Self
    where
        F: Future<Output = Result<Option<B256>>>,
    {
        let start = Instant::now();
        let result = request.await;
        let end = Instant::now();
        match result {
            Ok(hash) => Self {
                start,
                end,
                hash,
                error: None,
            },
            Err(error) => Self {
                start,
                end,
                hash: None,
                error: Some(error),
            },
        }
    }

    pub fn latency(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }
}

#[async_trait]
pub trait LoadTestMode: Send + Sync {
    /// Canonical, lowercase name.
    fn name(&self) -> &'static str;

    /// Short names, matched case-sensitively.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn requires_load_tester(&self) -> bool {
        false
    }

    fn requires_erc20(&self) -> bool {
        false
    }

    fn requires_erc721(&self) -> bool {
        false
    }

    /// Whether the engine must build a [`RecallIndex`] before the run.
    fn requires_recall(&self) -> bool {
        false
    }

    /// Whether every sending account must hold funds before
    /// [`LoadTestMode::init`] runs, instead of being funded on first use.
    fn needs_funded_accounts(&self) -> bool {
        false
    }

    /// Gas reserved from the vault before the request, 0 to skip the vault.
    fn gas_limit_hint(&self, limits: &StandardGasLimits) -> u64 {
        limits.contract_interact
    }

    /// One-time setup, run after contracts, recall index and accounts are
    /// ready.
    async fn init(&self, _deps: &ModeDeps, _token: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, deps: &ModeDeps, opts: &TxOpts) -> ExecOutcome;
}

/// Everything a mode may touch. Built once by the engine and shared by all
/// workers.
pub struct ModeDeps {
    pub client: EvmClient,
    pub config: Arc<LoadTestConfig>,
    pub chain: ChainParams,
    pub contracts: DeployedContracts,
    pub recall: Option<Arc<RecallIndex>>,
    pub accounts: Arc<AccountPool>,
    pub fees: Arc<FeeOracle>,
    pub gas_limits: StandardGasLimits,
    /// Main account, for setup transfers during init.
    pub driver: Option<Arc<Account>>,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for ModeDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeDeps")
            .field("client", &self.client)
            .field("chain", &self.chain)
            .field("contracts", &self.contracts)
            .field("accounts", &self.accounts.len())
            .finish_non_exhaustive()
    }
}

impl ModeDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: EvmClient,
        config: Arc<LoadTestConfig>,
        chain: ChainParams,
        contracts: DeployedContracts,
        recall: Option<Arc<RecallIndex>>,
        accounts: Arc<AccountPool>,
        fees: Arc<FeeOracle>,
    ) -> Self {
        let seed = config.seed;
        Self {
            client,
            config,
            chain,
            contracts,
            recall,
            accounts,
            fees,
            gas_limits: StandardGasLimits::default(),
            driver: None,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn with_driver(mut self, driver: Arc<Account>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Runs `f` with the run's seeded generator. Never hold it across an
    /// await.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    /// Configured recipient, or a fresh random address per request when
    /// random recipients are enabled.
    pub fn recipient(&self) -> Address {
        if self.config.random_recipients {
            self.with_rng(|rng| Address::from(rng.r#gen::<[u8; 20]>()))
        } else {
            self.config.to_address
        }
    }

    pub fn recall(&self) -> Result<&RecallIndex> {
        self.recall
            .as_deref()
            .context("recall index was not built at startup")
    }

    /// Calls, prints or submits `call` depending on the run's terminal
    /// mode.
    pub async fn submit(&self, call: TxCall, opts: &TxOpts) -> Result<Option<B256>> {
        if self.config.eth_call_only {
            let block = if self.config.eth_call_only_latest_block {
                None
            } else {
                call.call_block
            };
            self.client.call(call.to_request(opts.from()), block).await?;
            return Ok(None);
        }

        let gas_limit = match opts.gas_limit.or(call.gas_limit) {
            Some(limit) => limit,
            None => {
                self.client
                    .estimate_gas(call.to_request(opts.from()))
                    .await?
            }
        };
        let signed = sign_call(
            opts.account.signer(),
            &call,
            opts.nonce,
            opts.chain_id,
            opts.fees,
            gas_limit,
        )?;
        self.dispatch(signed).await
    }

    /// Sends a zero-value self-transfer at `opts.nonce`. Used when a request
    /// failed before its transaction reached the node, so that later nonces
    /// of the account can still be mined.
    pub async fn fill_nonce(&self, opts: &TxOpts) -> Result<Option<B256>> {
        let call = TxCall::transfer(opts.from(), U256::ZERO);
        let signed = sign_call(
            opts.account.signer(),
            &call,
            opts.nonce,
            opts.chain_id,
            opts.fees,
            TRANSFER_GAS,
        )?;
        self.dispatch(signed).await
    }

    /// Prints or submits an already signed transaction.
    pub async fn dispatch(&self, signed: SignedTx) -> Result<Option<B256>> {
        if self.config.output_raw_tx_only {
            println!("{}", signed.raw_hex());
            return Ok(None);
        }
        let hash = self.client.send_raw(&signed.raw).await?;
        Ok(Some(hash))
    }
}

/// Name and alias lookup for modes.
pub struct ModeRegistry {
    modes: Vec<Arc<dyn LoadTestMode>>,
    names: HashMap<&'static str, usize>,
    aliases: HashMap<&'static str, usize>,
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ModeRegistry {
    pub fn empty() -> Self {
        Self {
            modes: Vec::new(),
            names: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Registry holding every built-in mode.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(TransactionMode));
        registry.register(Arc::new(DeployMode::default()));
        registry.register(Arc::new(StoreMode));
        registry.register(Arc::new(IncrementMode));
        registry.register(Arc::new(Erc20Mode));
        registry.register(Arc::new(Erc721Mode));
        registry.register(Arc::new(ContractCallMode));
        registry.register(Arc::new(RecallMode));
        registry.register(Arc::new(RpcMode));
        registry.register(Arc::new(RandomMode::new()));
        registry.register(Arc::new(UniswapV3Mode));
        registry.register(Arc::new(BlobMode));
        registry
    }

    /// Adds `mode`; a later registration under the same name or alias
    /// replaces the earlier one.
    pub fn register(&mut self, mode: Arc<dyn LoadTestMode>) {
        let index = self.modes.len();
        self.names.insert(mode.name(), index);
        for alias in mode.aliases() {
            self.aliases.insert(alias, index);
        }
        self.modes.push(mode);
    }

    /// Aliases first (case-sensitive), then canonical names
    /// (case-insensitive).
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn LoadTestMode>, ConfigError> {
        let name = name.trim();
        let index = self
            .aliases
            .get(name)
            .or_else(|| self.names.get(name.to_ascii_lowercase().as_str()))
            .ok_or_else(|| ConfigError::UnknownMode {
                name: name.to_string(),
            })?;
        Ok(self.modes[*index].clone())
    }

    pub fn resolve_all(&self, names: &[String]) -> Result<Vec<Arc<dyn LoadTestMode>>, ConfigError> {
        names.iter().map(|name| self.lookup(name)).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modes.iter().map(|m| m.name())
    }
}

/// Contracts the selected modes need deployed or configured.
pub fn contract_needs(modes: &[Arc<dyn LoadTestMode>]) -> ContractNeeds {
    ContractNeeds {
        load_tester: modes.iter().any(|m| m.requires_load_tester()),
        erc20: modes.iter().any(|m| m.requires_erc20()),
        erc721: modes.iter().any(|m| m.requires_erc721()),
    }
}

fn conflict(reason: impl Into<String>) -> ConfigError {
    ConfigError::Conflict {
        reason: reason.into(),
    }
}

/// Checks the selected mode set against the configuration. A lone `rpc`
/// mode switches the run to call-only.
pub fn apply_mode_rules(
    config: &mut LoadTestConfig,
    modes: &[Arc<dyn LoadTestMode>],
) -> Result<(), ConfigError> {
    let mut seen = Vec::with_capacity(modes.len());
    for mode in modes {
        if seen.contains(&mode.name()) {
            return Err(conflict(format!("mode '{}' is listed twice", mode.name())));
        }
        seen.push(mode.name());
    }
    let has = |name: &str| seen.contains(&name);
    let alone = modes.len() == 1;

    for name in ["random", "blob"] {
        if has(name) && !alone {
            return Err(conflict(format!("the '{name}' mode must be used alone")));
        }
    }

    if has("rpc") {
        if alone {
            config.eth_call_only = true;
            if config.adaptive.enabled {
                return Err(conflict("rpc mode cannot use adaptive rate limiting"));
            }
            if config.receipts.wait {
                return Err(conflict("rpc mode does not wait for receipts"));
            }
            if config.accounts.pre_fund {
                return Err(conflict("rpc mode cannot pre-fund sending accounts"));
            }
        } else if !config.eth_call_only {
            return Err(conflict(
                "rpc mode combined with other modes requires call only",
            ));
        }
    }

    if config.output_raw_tx_only {
        if !alone {
            return Err(conflict("raw transaction output supports a single mode"));
        }
        if has("rpc") || has("uniswapv3") {
            return Err(conflict(format!(
                "raw transaction output is not supported by the '{}' mode",
                seen[0]
            )));
        }
    }

    if has("contract-call") {
        let contracts = &config.contracts;
        if contracts.contract_call_address.is_none() || contracts.calldata.is_none() {
            return Err(conflict(
                "contract-call mode needs both a contract address and calldata",
            ));
        }
    }

    if has("blob") {
        if config.eth_call_only {
            return Err(conflict("blob mode cannot run in call only mode"));
        }
        if config.gas.legacy_tx {
            return Err(conflict("blob transactions cannot be legacy transactions"));
        }
    }

    Ok(())
}
