use loadtest_core::config::{LoadTestConfig, DEFAULT_TO_ADDRESS};
use loadtest_core::{ConfigError, PriceStrategy, SummaryOutputMode, WaveShape};
use std::io::Write;

fn expect_invalid(config: &LoadTestConfig, field: &str) {
    match config.validate() {
        Err(ConfigError::InvalidValue { field: f, .. }) => assert_eq!(f, field),
        other => panic!("expected invalid '{}', got {:?}", field, other),
    }
}

fn expect_conflict(config: &LoadTestConfig) {
    match config.validate() {
        Err(ConfigError::Conflict { .. }) => {}
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[test]
fn test_load_full_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
rpc_url = "http://127.0.0.1:8545"
requests = 100
concurrency = 4
rate_limit = 50.0
modes = ["t", "store"]
to_address = "0x000000000000000000000000000000000000dead"
eth_amount_in_wei = 1

[gas]
legacy_tx = true
price_multiplier = 1.5

[adaptive]
enabled = true
target_gas_used = 15000000
increment = 2.0
cycle_blocks = 5
backoff_factor = 0.5

[gas_manager]
wave = "square"
period = 10
amplitude = 5000000
target = 10000000
price_strategy = "fixed"
fixed_gas_price_wei = 5000000000

[summary]
enabled = true
output_mode = "json"
"#
    )
    .unwrap();

    let config = LoadTestConfig::from_path(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.requests, 100);
    assert_eq!(config.concurrency, 4);
    assert_eq!(config.modes, vec!["t", "store"]);
    assert_ne!(config.to_address, DEFAULT_TO_ADDRESS);
    assert!(config.gas.legacy_tx);
    assert_eq!(config.adaptive.cycle_blocks, 5);
    assert_eq!(config.gas_manager.wave, Some(WaveShape::Square));
    assert_eq!(config.gas_manager.price_strategy, PriceStrategy::Fixed);
    assert_eq!(config.summary.output_mode, SummaryOutputMode::Json);
    // Untouched sections keep their defaults.
    assert_eq!(config.receipts.max_retry, 30);
    assert_eq!(config.store_data_size, 1024);
}

#[test]
fn test_missing_file() {
    let err = LoadTestConfig::from_path("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}

#[test]
fn test_malformed_toml() {
    let err = LoadTestConfig::from_toml_str("requests = \"many\"").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn test_backoff_factor_must_be_positive() {
    let mut config = LoadTestConfig::default();
    config.adaptive.backoff_factor = 0.0;
    expect_invalid(&config, "adaptive.backoff_factor");
}

#[test]
fn test_adaptive_backoff_must_damp() {
    let mut config = LoadTestConfig::default();
    config.adaptive.enabled = true;
    config.adaptive.backoff_factor = 2.0;
    expect_invalid(&config, "adaptive.backoff_factor");
}

#[test]
fn test_adaptive_needs_a_rate_to_adjust() {
    let mut config = LoadTestConfig::default();
    config.adaptive.enabled = true;
    config.validate().unwrap();

    config.rate_limit = 0.0;
    expect_conflict(&config);
    config.rate_limit = -1.0;
    expect_conflict(&config);

    config.adaptive.enabled = false;
    config.validate().unwrap();
}

#[test]
fn test_price_multiplier_must_be_positive() {
    let mut config = LoadTestConfig::default();
    config.gas.price_multiplier = 0.0;
    expect_invalid(&config, "gas.price_multiplier");
}

#[test]
fn test_receipt_wait_needs_two_retries() {
    let mut config = LoadTestConfig::default();
    config.receipts.wait = true;
    config.receipts.max_retry = 1;
    expect_invalid(&config, "receipts.max_retry");

    config.receipts.max_retry = 2;
    config.validate().unwrap();
}

#[test]
fn test_call_only_forbids_funding_receipts_and_adaptive() {
    let mut config = LoadTestConfig::default();
    config.eth_call_only = true;
    config.validate().unwrap();

    config.accounts.count = 3;
    expect_conflict(&config);
    config.accounts.count = 0;

    config.receipts.wait = true;
    expect_conflict(&config);
    config.receipts.wait = false;

    config.adaptive.enabled = true;
    expect_conflict(&config);
}

#[test]
fn test_zero_concurrency_rejected() {
    let mut config = LoadTestConfig::default();
    config.concurrency = 0;
    expect_invalid(&config, "concurrency");
}

#[test]
fn test_forced_price_below_tip_rejected() {
    let mut config = LoadTestConfig::default();
    config.gas.force_price = 1;
    config.gas.priority_price = 2;
    expect_conflict(&config);
}

#[test]
fn test_gas_manager_rules() {
    let mut config = LoadTestConfig::default();
    config.gas_manager.wave = Some(WaveShape::Sine);
    config.gas_manager.amplitude = 20;
    config.gas_manager.target = 10;
    expect_invalid(&config, "gas_manager.amplitude");

    config.gas_manager.amplitude = 5;
    config.gas_manager.period = 0;
    expect_invalid(&config, "gas_manager.period");

    config.gas_manager.period = 10;
    config.gas_manager.price_strategy = PriceStrategy::Dynamic;
    config.gas_manager.dynamic_gas_prices_variation = 1.5;
    expect_invalid(&config, "gas_manager.dynamic_gas_prices_variation");
}

#[test]
fn test_uniswap_rules() {
    let mut config = LoadTestConfig::default();
    config.uniswap_v3.pool_fees = 42;
    expect_invalid(&config, "uniswap_v3.pool_fees");

    config.uniswap_v3.pool_fees = 500;
    config.uniswap_v3.pool_token0 = Some(DEFAULT_TO_ADDRESS);
    expect_conflict(&config);
}

#[test]
fn test_invalid_rpc_url() {
    let config = LoadTestConfig {
        rpc_url: "localhost:8545".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidRpcUrl { .. })
    ));
}

#[test]
fn test_funding_enabled() {
    let mut config = LoadTestConfig::default();
    assert!(!config.funding_enabled());
    config.accounts.funding_amount = 1;
    assert!(config.funding_enabled());
}
