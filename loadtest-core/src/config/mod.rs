//! Load test configuration.
//!
//! [`LoadTestConfig`] is deserialized from TOML (every section is optional)
//! and then overridden field by field from the command line. Once
//! [`LoadTestConfig::validate`] passes the config is treated as immutable and
//! shared by reference.

use crate::error::ConfigError;
use crate::gas::pricer::PriceStrategy;
use crate::gas::wave::WaveShape;
use alloy_primitives::{address, Address, Bytes};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Well-known development key, funded on most local devnets.
pub const DEFAULT_PRIVATE_KEY: &str =
    "42b6e34dc21598a807dc19d7784c71b2a7a01f6480dc6f58258f78e539f1a1fa";

pub const DEFAULT_TO_ADDRESS: Address = address!("DEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF");

/// Fee tiers a Uniswap V3 pool can be created with, in hundredths of a bip.
pub const UNISWAP_FEE_TIERS: [u32; 4] = [100, 500, 3_000, 10_000];

/// Hex private key that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretKeyHex(String);

impl SecretKeyHex {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The key without surrounding whitespace or `0x` prefix.
    pub fn expose(&self) -> &str {
        let trimmed = self.0.trim();
        trimmed.strip_prefix("0x").unwrap_or(trimmed)
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl fmt::Debug for SecretKeyHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKeyHex(<redacted>)")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadTestConfig {
    pub rpc_url: String,
    /// Overrides `eth_chainId` when set.
    pub chain_id: Option<u64>,
    pub requests: u64,
    pub concurrency: u64,
    /// Requests per second; `<= 0` disables limiting.
    pub rate_limit: f64,
    pub time_limit_secs: Option<u64>,
    pub seed: u64,
    pub modes: Vec<String>,
    pub private_key: SecretKeyHex,
    pub to_address: Address,
    #[serde(deserialize_with = "deserialize_u128")]
    pub eth_amount_in_wei: u128,
    pub random_recipients: bool,
    pub eth_call_only: bool,
    pub eth_call_only_latest_block: bool,
    pub output_raw_tx_only: bool,
    /// Starting nonce for the single-account run; fetched when unset.
    pub start_nonce: Option<u64>,
    pub store_data_size: u64,
    pub recall_length: u64,
    pub block_batch_size: u64,
    /// Max fee per blob gas, in gwei.
    pub blob_fee_cap: u64,
    pub gas: GasConfig,
    pub adaptive: AdaptiveConfig,
    pub receipts: ReceiptConfig,
    pub accounts: SendingAccountsConfig,
    pub gas_manager: GasManagerConfig,
    pub contracts: ContractsConfig,
    pub preconf: PreconfConfig,
    pub summary: SummaryConfig,
    pub uniswap_v3: UniswapV3Config,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: None,
            requests: 1,
            concurrency: 1,
            rate_limit: 4.0,
            time_limit_secs: None,
            seed: 123_456,
            modes: vec!["t".to_string()],
            private_key: SecretKeyHex::new(DEFAULT_PRIVATE_KEY),
            to_address: DEFAULT_TO_ADDRESS,
            eth_amount_in_wei: 0,
            random_recipients: false,
            eth_call_only: false,
            eth_call_only_latest_block: false,
            output_raw_tx_only: false,
            start_nonce: None,
            store_data_size: 1024,
            recall_length: 50,
            block_batch_size: 25,
            blob_fee_cap: 100_000,
            gas: GasConfig::default(),
            adaptive: AdaptiveConfig::default(),
            receipts: ReceiptConfig::default(),
            accounts: SendingAccountsConfig::default(),
            gas_manager: GasManagerConfig::default(),
            contracts: ContractsConfig::default(),
            preconf: PreconfConfig::default(),
            summary: SummaryConfig::default(),
            uniswap_v3: UniswapV3Config::default(),
        }
    }
}

/// Gas limit and price overrides. Zero means "not forced".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    pub force_limit: u64,
    pub force_price: u64,
    pub priority_price: u64,
    pub price_multiplier: f64,
    /// Pause sending while the latest base fee is above this.
    pub max_base_fee: u64,
    pub legacy_tx: bool,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            force_limit: 0,
            force_price: 0,
            priority_price: 0,
            price_multiplier: 1.0,
            max_base_fee: 0,
            legacy_tx: false,
        }
    }
}

/// Closed-loop rate control driven by block gas usage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub target_gas_used: u64,
    /// Requests per second added per under-target window.
    pub increment: f64,
    pub cycle_blocks: u64,
    /// Rate multiplier applied per over-target window.
    pub backoff_factor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_gas_used: 15_000_000,
            increment: 50.0,
            cycle_blocks: 10,
            backoff_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiptConfig {
    pub wait: bool,
    pub max_retry: u32,
    pub initial_delay_ms: u64,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            wait: false,
            max_retry: 30,
            initial_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SendingAccountsConfig {
    /// Number of sending accounts; 0 sends everything from the main key.
    pub count: u64,
    /// Wei sent to each sending account; 0 disables funding.
    #[serde(deserialize_with = "deserialize_u128")]
    pub funding_amount: u128,
    pub pre_fund: bool,
    pub refund: bool,
    pub per_funding_tx: u64,
    pub from_file: Option<String>,
    pub dump_file: Option<String>,
    pub check_balance_before_funding: bool,
}

impl Default for SendingAccountsConfig {
    fn default() -> Self {
        Self {
            count: 0,
            funding_amount: 0,
            pre_fund: false,
            refund: false,
            per_funding_tx: 1,
            from_file: None,
            dump_file: None,
            check_balance_before_funding: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GasManagerConfig {
    /// Gas budget shaping; `None` leaves the vault disabled.
    pub wave: Option<WaveShape>,
    pub period: u64,
    pub amplitude: u64,
    pub target: u64,
    pub price_strategy: PriceStrategy,
    pub fixed_gas_price_wei: u64,
    pub dynamic_gas_prices_wei: Vec<u64>,
    pub dynamic_gas_prices_variation: f64,
}

impl Default for GasManagerConfig {
    fn default() -> Self {
        Self {
            wave: None,
            period: 1,
            amplitude: 0,
            target: 30_000_000,
            price_strategy: PriceStrategy::Estimated,
            fixed_gas_price_wei: 300_000_000,
            dynamic_gas_prices_wei: vec![0, 1_000_000, 0, 10_000_000, 0, 100_000_000],
            dynamic_gas_prices_variation: 0.3,
        }
    }
}

impl GasManagerConfig {
    pub fn vault_enabled(&self) -> bool {
        self.wave.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    pub load_tester: Option<Address>,
    pub erc20: Option<Address>,
    pub erc721: Option<Address>,
    pub contract_call_address: Option<Address>,
    pub calldata: Option<Bytes>,
    pub contract_call_payable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PreconfConfig {
    pub check: bool,
    pub stats_file: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SummaryOutputMode {
    #[default]
    Text,
    Json,
}

impl FromStr for SummaryOutputMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(SummaryOutputMode::Text),
            "json" => Ok(SummaryOutputMode::Json),
            other => Err(ConfigError::invalid(
                "summary.output_mode",
                format!("expected 'text' or 'json', got '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub output_mode: SummaryOutputMode,
    pub output_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UniswapV3Config {
    pub router: Option<Address>,
    pub pool_token0: Option<Address>,
    pub pool_token1: Option<Address>,
    pub pool_fees: u32,
    #[serde(deserialize_with = "deserialize_u128")]
    pub swap_amount_in: u128,
}

impl Default for UniswapV3Config {
    fn default() -> Self {
        Self {
            router: None,
            pool_token0: None,
            pool_token1: None,
            pool_fees: 3_000,
            swap_amount_in: 1_000,
        }
    }
}

impl UniswapV3Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !UNISWAP_FEE_TIERS.contains(&self.pool_fees) {
            return Err(ConfigError::invalid(
                "uniswap_v3.pool_fees",
                format!("supported fee tiers are {UNISWAP_FEE_TIERS:?}"),
            ));
        }
        if self.swap_amount_in == 0 {
            return Err(ConfigError::invalid(
                "uniswap_v3.swap_amount_in",
                "swap amount input has to be greater than zero",
            ));
        }
        if self.pool_token0.is_some() != self.pool_token1.is_some() {
            return Err(ConfigError::conflict(
                "both pool tokens must be empty or specified",
            ));
        }
        Ok(())
    }
}

impl LoadTestConfig {
    /// Load configuration from a TOML file
    ///
    /// # Example
    /// ```ignore
    /// let config = LoadTestConfig::from_path("loadtest.toml")?;
    /// ```
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => ConfigError::IoError {
                path: path.display().to_string(),
                msg: e.to_string(),
            },
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::invalid("toml", e.message().to_string()))
    }

    /// Checks every cross-field constraint. Mode-specific rules are checked
    /// once the mode names have been resolved.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "rpc_url".to_string(),
            });
        }
        if !(self.rpc_url.starts_with("http://") || self.rpc_url.starts_with("https://")) {
            return Err(ConfigError::InvalidRpcUrl {
                url: self.rpc_url.clone(),
            });
        }
        if self.private_key.is_empty() {
            return Err(ConfigError::MissingField {
                field: "private_key".to_string(),
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if self.modes.is_empty() {
            return Err(ConfigError::MissingField {
                field: "modes".to_string(),
            });
        }

        self.validate_gas()?;
        self.validate_adaptive()?;
        self.validate_call_only()?;

        if self.receipts.wait && self.receipts.max_retry < 2 {
            return Err(ConfigError::invalid(
                "receipts.max_retry",
                "when waiting for a receipt, use a max retry of at least 2",
            ));
        }
        if self.accounts.per_funding_tx == 0 {
            return Err(ConfigError::invalid(
                "accounts.per_funding_tx",
                "must be at least 1",
            ));
        }
        if self.accounts.pre_fund && self.accounts.funding_amount == 0 {
            return Err(ConfigError::conflict(
                "pre-funding sending accounts needs a non-zero funding amount",
            ));
        }

        self.uniswap_v3.validate()?;
        self.validate_gas_manager()
    }

    fn validate_gas(&self) -> Result<(), ConfigError> {
        let gas = &self.gas;
        if !(gas.price_multiplier > 0.0) || !gas.price_multiplier.is_finite() {
            return Err(ConfigError::invalid(
                "gas.price_multiplier",
                "must be a positive number",
            ));
        }
        if gas.force_price != 0 && gas.priority_price != 0 && gas.force_price < gas.priority_price
        {
            return Err(ConfigError::conflict(
                "forced gas price is lower than the priority gas price",
            ));
        }
        Ok(())
    }

    fn validate_adaptive(&self) -> Result<(), ConfigError> {
        let adaptive = &self.adaptive;
        if !(adaptive.backoff_factor > 0.0) {
            return Err(ConfigError::invalid(
                "adaptive.backoff_factor",
                format!("must be positive, got {}", adaptive.backoff_factor),
            ));
        }
        if !adaptive.enabled {
            return Ok(());
        }
        if !(self.rate_limit > 0.0) {
            return Err(ConfigError::conflict(
                "adaptive rate limiting adjusts rate_limit, which must be positive",
            ));
        }
        if adaptive.backoff_factor >= 1.0 {
            return Err(ConfigError::invalid(
                "adaptive.backoff_factor",
                format!("must be below 1 to damp the rate, got {}", adaptive.backoff_factor),
            ));
        }
        if adaptive.cycle_blocks == 0 {
            return Err(ConfigError::invalid(
                "adaptive.cycle_blocks",
                "must be at least 1",
            ));
        }
        if adaptive.increment < 0.0 {
            return Err(ConfigError::invalid(
                "adaptive.increment",
                "must not be negative",
            ));
        }
        Ok(())
    }

    fn validate_call_only(&self) -> Result<(), ConfigError> {
        if !self.eth_call_only {
            return Ok(());
        }
        let accounts = &self.accounts;
        if accounts.pre_fund || accounts.from_file.is_some() || accounts.count > 0 {
            return Err(ConfigError::conflict(
                "sending accounts cannot be funded in call only mode",
            ));
        }
        if self.receipts.wait {
            return Err(ConfigError::conflict(
                "waiting for receipts doesn't make sense in call only mode",
            ));
        }
        if self.adaptive.enabled {
            return Err(ConfigError::conflict(
                "adaptive rate limiting needs submitted transactions, not calls",
            ));
        }
        Ok(())
    }

    fn validate_gas_manager(&self) -> Result<(), ConfigError> {
        let gm = &self.gas_manager;
        if let Some(wave) = gm.wave {
            if wave != WaveShape::Flat && gm.period == 0 {
                return Err(ConfigError::invalid(
                    "gas_manager.period",
                    "must be at least 1",
                ));
            }
            if gm.amplitude > gm.target {
                return Err(ConfigError::invalid(
                    "gas_manager.amplitude",
                    "must not exceed the target",
                ));
            }
        }
        match gm.price_strategy {
            PriceStrategy::Estimated => {}
            PriceStrategy::Fixed if gm.fixed_gas_price_wei == 0 => {
                return Err(ConfigError::invalid(
                    "gas_manager.fixed_gas_price_wei",
                    "fixed strategy needs a non-zero price",
                ));
            }
            PriceStrategy::Fixed => {}
            PriceStrategy::Dynamic => {
                if gm.dynamic_gas_prices_wei.is_empty() {
                    return Err(ConfigError::invalid(
                        "gas_manager.dynamic_gas_prices_wei",
                        "dynamic strategy needs at least one price",
                    ));
                }
                if !(0.0..=1.0).contains(&gm.dynamic_gas_prices_variation) {
                    return Err(ConfigError::invalid(
                        "gas_manager.dynamic_gas_prices_variation",
                        "must be between 0 and 1",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Whether account funding should happen at all.
    pub fn funding_enabled(&self) -> bool {
        !self.eth_call_only && self.accounts.funding_amount > 0
    }
}

fn deserialize_u128<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct U128Visitor;

    impl<'de> serde::de::Visitor<'de> for U128Visitor {
        type Value = u128;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or integer representing a u128")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            u128::from_str(value.trim()).map_err(|_| E::custom("invalid u128"))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value as u128)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            u128::try_from(value).map_err(|_| E::custom("negative u128"))
        }
    }

    deserializer.deserialize_any(U128Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        LoadTestConfig::default().validate().unwrap();
    }

    #[test]
    fn test_private_key_is_redacted() {
        let config = LoadTestConfig::default();
        let debug = format!("{config:?}");
        assert!(!debug.contains(DEFAULT_PRIVATE_KEY));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_secret_key_strips_prefix() {
        assert_eq!(SecretKeyHex::new("  0xabcd \n").expose(), "abcd");
    }

    #[test]
    fn test_u128_from_string_or_integer() {
        let config = LoadTestConfig::from_toml_str(
            "eth_amount_in_wei = \"1000000000000000000000\"\n[accounts]\nfunding_amount = 5\n",
        )
        .unwrap();
        assert_eq!(config.eth_amount_in_wei, 1_000_000_000_000_000_000_000);
        assert_eq!(config.accounts.funding_amount, 5);
    }
}
