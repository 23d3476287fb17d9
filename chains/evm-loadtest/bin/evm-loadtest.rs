use alloy_primitives::{Address, Bytes};
use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use evm_loadtest::{Engine, ModeRegistry, RunReport};
use loadtest_core::{
    ConfigError, LoadTestConfig, PriceStrategy, SecretKeyHex, SummaryOutputMode, WaveShape,
    setup_logger, spawn_shutdown_triggers,
};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code for configuration errors.
const EXIT_CONFIG: u8 = 2;

/// JSON-RPC load generator for EVM chains.
///
/// Values given here override the ones from `--config`.
#[derive(Parser, Debug)]
#[command(name = "evm-loadtest", author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<String>,

    /// Console log level, overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    #[arg(long)]
    rpc_url: Option<String>,
    /// Use this chain id instead of querying eth_chainId
    #[arg(long)]
    chain_id: Option<u64>,
    #[arg(short = 'n', long)]
    requests: Option<u64>,
    #[arg(short, long)]
    concurrency: Option<u64>,
    /// Requests per second, 0 or below disables the limit
    #[arg(short, long)]
    rate_limit: Option<f64>,
    /// Stop after this many seconds
    #[arg(short, long)]
    time_limit: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Load modes, repeatable or comma separated
    #[arg(short, long = "mode", value_delimiter = ',')]
    modes: Vec<String>,

    #[arg(long)]
    adaptive_rate_limit: bool,
    #[arg(long)]
    adaptive_target_size: Option<u64>,
    #[arg(long)]
    adaptive_rate_limit_increment: Option<f64>,
    /// Blocks per adaptive window
    #[arg(long)]
    adaptive_cycle_duration: Option<u64>,
    #[arg(long)]
    adaptive_backoff_factor: Option<f64>,

    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,
    #[arg(long)]
    to_address: Option<Address>,
    #[arg(long)]
    eth_amount_in_wei: Option<u128>,
    #[arg(long)]
    random_recipients: bool,
    /// Nonce of the first transaction from the main account
    #[arg(long)]
    start_nonce: Option<u64>,

    #[arg(long)]
    legacy_tx_mode: bool,
    #[arg(long)]
    gas_price: Option<u64>,
    #[arg(long)]
    priority_gas_price: Option<u64>,
    #[arg(long)]
    gas_limit: Option<u64>,
    #[arg(long)]
    gas_price_multiplier: Option<f64>,
    /// Pause sending while the base fee is above this
    #[arg(long)]
    max_base_fee_wei: Option<u64>,

    /// Execute with eth_call instead of sending transactions
    #[arg(long)]
    call_only: bool,
    /// Run eth_call against the latest block even when replaying history
    #[arg(long)]
    call_only_latest_block: bool,
    /// Print signed transactions instead of sending them
    #[arg(long)]
    output_raw_tx_only: bool,

    #[arg(long)]
    wait_for_receipt: bool,
    #[arg(long)]
    receipt_retry_max: Option<u32>,
    /// Initial receipt poll delay in milliseconds
    #[arg(long)]
    receipt_retry_delay: Option<u64>,
    #[arg(long)]
    check_preconf: bool,
    #[arg(long)]
    preconf_stats_file: Option<String>,

    #[arg(long)]
    sending_accounts_count: Option<u64>,
    #[arg(long)]
    account_funding_amount: Option<u128>,
    #[arg(long)]
    pre_fund_sending_accounts: bool,
    #[arg(long)]
    refund_remaining_funds: bool,
    #[arg(long)]
    sending_accounts_file: Option<String>,
    #[arg(long)]
    dump_sending_accounts_file: Option<String>,
    #[arg(long)]
    check_balance_before_funding: bool,
    #[arg(long)]
    accounts_per_funding_tx: Option<u64>,

    #[arg(long)]
    summary: bool,
    #[arg(long, value_enum)]
    summary_output_mode: Option<SummaryOutputMode>,
    #[arg(long)]
    summary_output_file: Option<String>,

    #[arg(long)]
    store_data_size: Option<u64>,
    #[arg(long)]
    contract_address: Option<Address>,
    #[arg(long)]
    calldata: Option<Bytes>,
    #[arg(long)]
    contract_call_payable: bool,
    /// Max fee per blob gas, in gwei
    #[arg(long)]
    blob_fee_cap: Option<u64>,
    #[arg(long)]
    recall_length: Option<u64>,
    #[arg(long)]
    block_batch_size: Option<u64>,
    #[arg(long)]
    loadtest_contract_address: Option<Address>,
    #[arg(long)]
    erc20_address: Option<Address>,
    #[arg(long)]
    erc721_address: Option<Address>,

    #[arg(long)]
    uniswap_router_address: Option<Address>,
    #[arg(long = "uniswap-pool-token-0-address")]
    uniswap_pool_token0_address: Option<Address>,
    #[arg(long = "uniswap-pool-token-1-address")]
    uniswap_pool_token1_address: Option<Address>,
    #[arg(long)]
    uniswap_pool_fees: Option<u32>,
    #[arg(long)]
    uniswap_swap_amount_in: Option<u128>,

    #[arg(long, value_enum)]
    oscillation_wave: Option<WaveShape>,
    #[arg(long)]
    period: Option<u64>,
    #[arg(long)]
    amplitude: Option<u64>,
    #[arg(long)]
    target: Option<u64>,
    #[arg(long, value_enum)]
    price_strategy: Option<PriceStrategy>,
    #[arg(long)]
    fixed_gas_price_wei: Option<u64>,
    #[arg(long, value_delimiter = ',')]
    dynamic_gas_prices_wei: Vec<u64>,
    #[arg(long)]
    dynamic_gas_prices_variation: Option<f64>,
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl Args {
    /// Copies every flag that was given onto `config`.
    fn apply(self, config: &mut LoadTestConfig) {
        set(&mut config.rpc_url, self.rpc_url);
        if self.chain_id.is_some() {
            config.chain_id = self.chain_id;
        }
        set(&mut config.requests, self.requests);
        set(&mut config.concurrency, self.concurrency);
        set(&mut config.rate_limit, self.rate_limit);
        if self.time_limit.is_some() {
            config.time_limit_secs = self.time_limit;
        }
        set(&mut config.seed, self.seed);
        if !self.modes.is_empty() {
            config.modes = self.modes;
        }

        let adaptive = &mut config.adaptive;
        adaptive.enabled |= self.adaptive_rate_limit;
        set(&mut adaptive.target_gas_used, self.adaptive_target_size);
        set(&mut adaptive.increment, self.adaptive_rate_limit_increment);
        set(&mut adaptive.cycle_blocks, self.adaptive_cycle_duration);
        set(&mut adaptive.backoff_factor, self.adaptive_backoff_factor);

        set(
            &mut config.private_key,
            self.private_key.map(SecretKeyHex::new),
        );
        set(&mut config.to_address, self.to_address);
        set(&mut config.eth_amount_in_wei, self.eth_amount_in_wei);
        config.random_recipients |= self.random_recipients;
        if self.start_nonce.is_some() {
            config.start_nonce = self.start_nonce;
        }

        let gas = &mut config.gas;
        gas.legacy_tx |= self.legacy_tx_mode;
        set(&mut gas.force_price, self.gas_price);
        set(&mut gas.priority_price, self.priority_gas_price);
        set(&mut gas.force_limit, self.gas_limit);
        set(&mut gas.price_multiplier, self.gas_price_multiplier);
        set(&mut gas.max_base_fee, self.max_base_fee_wei);

        config.eth_call_only |= self.call_only;
        config.eth_call_only_latest_block |= self.call_only_latest_block;
        config.output_raw_tx_only |= self.output_raw_tx_only;

        let receipts = &mut config.receipts;
        receipts.wait |= self.wait_for_receipt;
        set(&mut receipts.max_retry, self.receipt_retry_max);
        set(&mut receipts.initial_delay_ms, self.receipt_retry_delay);
        config.preconf.check |= self.check_preconf;
        if self.preconf_stats_file.is_some() {
            config.preconf.stats_file = self.preconf_stats_file;
        }

        let accounts = &mut config.accounts;
        set(&mut accounts.count, self.sending_accounts_count);
        set(&mut accounts.funding_amount, self.account_funding_amount);
        accounts.pre_fund |= self.pre_fund_sending_accounts;
        accounts.refund |= self.refund_remaining_funds;
        if self.sending_accounts_file.is_some() {
            accounts.from_file = self.sending_accounts_file;
        }
        if self.dump_sending_accounts_file.is_some() {
            accounts.dump_file = self.dump_sending_accounts_file;
        }
        accounts.check_balance_before_funding |= self.check_balance_before_funding;
        set(&mut accounts.per_funding_tx, self.accounts_per_funding_tx);

        config.summary.enabled |= self.summary;
        set(&mut config.summary.output_mode, self.summary_output_mode);
        if self.summary_output_file.is_some() {
            config.summary.output_file = self.summary_output_file;
        }

        set(&mut config.store_data_size, self.store_data_size);
        set(&mut config.blob_fee_cap, self.blob_fee_cap);
        set(&mut config.recall_length, self.recall_length);
        set(&mut config.block_batch_size, self.block_batch_size);

        let contracts = &mut config.contracts;
        if self.contract_address.is_some() {
            contracts.contract_call_address = self.contract_address;
        }
        if self.calldata.is_some() {
            contracts.calldata = self.calldata;
        }
        contracts.contract_call_payable |= self.contract_call_payable;
        if self.loadtest_contract_address.is_some() {
            contracts.load_tester = self.loadtest_contract_address;
        }
        if self.erc20_address.is_some() {
            contracts.erc20 = self.erc20_address;
        }
        if self.erc721_address.is_some() {
            contracts.erc721 = self.erc721_address;
        }

        let uniswap = &mut config.uniswap_v3;
        if self.uniswap_router_address.is_some() {
            uniswap.router = self.uniswap_router_address;
        }
        if self.uniswap_pool_token0_address.is_some() {
            uniswap.pool_token0 = self.uniswap_pool_token0_address;
        }
        if self.uniswap_pool_token1_address.is_some() {
            uniswap.pool_token1 = self.uniswap_pool_token1_address;
        }
        set(&mut uniswap.pool_fees, self.uniswap_pool_fees);
        set(&mut uniswap.swap_amount_in, self.uniswap_swap_amount_in);

        let gm = &mut config.gas_manager;
        if self.oscillation_wave.is_some() {
            gm.wave = self.oscillation_wave;
        }
        set(&mut gm.period, self.period);
        set(&mut gm.amplitude, self.amplitude);
        set(&mut gm.target, self.target);
        set(&mut gm.price_strategy, self.price_strategy);
        set(&mut gm.fixed_gas_price_wei, self.fixed_gas_price_wei);
        if !self.dynamic_gas_prices_wei.is_empty() {
            gm.dynamic_gas_prices_wei = self.dynamic_gas_prices_wei;
        }
        set(
            &mut gm.dynamic_gas_prices_variation,
            self.dynamic_gas_prices_variation,
        );
    }
}

fn load_config(args: Args) -> Result<LoadTestConfig> {
    let mut config = match &args.config {
        Some(path) => LoadTestConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => LoadTestConfig::default(),
    };
    args.apply(&mut config);
    Ok(config)
}

async fn run(args: Args, token: CancellationToken) -> Result<RunReport> {
    let config = load_config(args)?;
    Engine::new(config).run(token).await
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let args = Args::parse();

    // Keep guard alive for file logging until main returns
    let _log_guard = setup_logger(&args.verbosity);

    let token = CancellationToken::new();
    spawn_shutdown_triggers(token.clone(), None);

    match run(args, token.clone()).await {
        Ok(report) => {
            info!(
                success = report.stats.success,
                failed = report.stats.failed,
                start_block = report.start_block,
                final_block = report.final_block,
                "🏁 Load test finished"
            );
            if token.is_cancelled() && report.summary.errors > 0 {
                warn!(errors = report.summary.errors, "Interrupted with errors");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) if e.chain().any(|cause| cause.is::<ConfigError>()) => {
            error!("Invalid configuration: {:#}", e);
            let unknown_mode = e.chain().any(|cause| {
                matches!(
                    cause.downcast_ref::<ConfigError>(),
                    Some(ConfigError::UnknownMode { .. })
                )
            });
            if unknown_mode {
                let modes: Vec<_> = ModeRegistry::with_defaults().names().collect();
                info!("Available modes: {}", modes.join(", "));
            }
            ExitCode::from(EXIT_CONFIG)
        }
        Err(e) => {
            error!("Load test failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
