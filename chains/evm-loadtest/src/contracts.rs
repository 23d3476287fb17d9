//! Contract bindings and embedded bytecode.
//!
//! ABIs are declared with `sol!` and encoded directly; no generated contract
//! instances are needed since every call goes through local signing.

use crate::account_pool::Account;
use crate::client::EvmClient;
use crate::receipts::await_receipt;
use crate::tx::{ChainParams, FeeParams, TxCall};
use alloy::network::ReceiptResponse as _;
use alloy_primitives::{Address, Bytes, address};
use alloy_sol_types::sol;
use anyhow::{Context, Result};
use loadtest_core::RetryConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Canonical Multicall3 deployment, identical on most EVM chains.
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

const LOAD_TESTER_BIN: &str = include_str!("../contracts/LoadTester.bin");
const ERC20_BIN: &str = include_str!("../contracts/ERC20.bin");
const ERC721_BIN: &str = include_str!("../contracts/ERC721.bin");

sol! {
    interface LoadTester {
        function store(bytes calldata data) external returns (bytes memory);
        function inc() external returns (uint256);
        function getCallCounter() external view returns (uint256);
    }

    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }

    interface IERC721 {
        function mintBatch(address to, uint256 quantity) external;
        function balanceOf(address owner) external view returns (uint256);
        function tokenURI(uint256 tokenId) external view returns (string memory);
    }

    interface Multicall3 {
        struct Call3Value {
            address target;
            bool allowFailure;
            uint256 value;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3Value(Call3Value[] calldata calls) external payable returns (Result[] memory returnData);
    }

    interface ISwapRouter02 {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        function exactInputSingle(ExactInputSingleParams calldata params) external payable returns (uint256 amountOut);
    }
}

/// Contracts with embedded creation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    LoadTester,
    Erc20,
    Erc721,
}

impl ContractKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContractKind::LoadTester => "LoadTester",
            ContractKind::Erc20 => "ERC20",
            ContractKind::Erc721 => "ERC721",
        }
    }

    pub fn bytecode(&self) -> Result<Bytes> {
        let hex_code = match self {
            ContractKind::LoadTester => LOAD_TESTER_BIN,
            ContractKind::Erc20 => ERC20_BIN,
            ContractKind::Erc721 => ERC721_BIN,
        };
        let code = hex::decode(hex_code.trim().trim_start_matches("0x"))
            .with_context(|| format!("Embedded {} bytecode is not valid hex", self.name()))?;
        Ok(Bytes::from(code))
    }
}

/// Contract addresses the selected modes need, resolved at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployedContracts {
    pub load_tester: Option<Address>,
    pub erc20: Option<Address>,
    pub erc721: Option<Address>,
}

/// Which contracts the selected modes need.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContractNeeds {
    pub load_tester: bool,
    pub erc20: bool,
    pub erc721: bool,
}

impl DeployedContracts {
    /// Uses the configured address for each needed contract, deploying the
    /// ones that are missing from `deployer`.
    pub async fn resolve(
        client: &EvmClient,
        configured: DeployedContracts,
        needs: ContractNeeds,
        deployer: &Account,
        chain: ChainParams,
        fees: FeeParams,
        token: &CancellationToken,
    ) -> Result<Self> {
        let mut resolved = DeployedContracts::default();
        for (needed, given, slot, kind) in [
            (
                needs.load_tester,
                configured.load_tester,
                &mut resolved.load_tester,
                ContractKind::LoadTester,
            ),
            (
                needs.erc20,
                configured.erc20,
                &mut resolved.erc20,
                ContractKind::Erc20,
            ),
            (
                needs.erc721,
                configured.erc721,
                &mut resolved.erc721,
                ContractKind::Erc721,
            ),
        ] {
            if !needed {
                continue;
            }
            let address = match given {
                Some(address) => {
                    info!(contract = kind.name(), %address, "Using configured contract");
                    address
                }
                None => deploy(client, kind, deployer, chain, fees, token).await?,
            };
            *slot = Some(address);
        }
        Ok(resolved)
    }

    pub fn require_load_tester(&self) -> Result<Address> {
        self.load_tester
            .context("LoadTester contract was not resolved at startup")
    }

    pub fn require_erc20(&self) -> Result<Address> {
        self.erc20.context("ERC20 contract was not resolved at startup")
    }

    pub fn require_erc721(&self) -> Result<Address> {
        self.erc721
            .context("ERC721 contract was not resolved at startup")
    }
}

/// Deploys `kind` and blocks until a successful receipt names the new
/// address.
pub async fn deploy(
    client: &EvmClient,
    kind: ContractKind,
    deployer: &Account,
    chain: ChainParams,
    fees: FeeParams,
    token: &CancellationToken,
) -> Result<Address> {
    info!(contract = kind.name(), "🚀 Deploying contract");
    let call = TxCall::create(kind.bytecode()?);
    let hash = deployer
        .send(client, call, chain, fees)
        .await
        .with_context(|| format!("Failed to deploy {}", kind.name()))?;

    let retry = RetryConfig::new(60, 500).with_max_delay(5_000);
    let receipt = await_receipt(client, hash, retry, token).await?;
    anyhow::ensure!(
        receipt.status(),
        "{} deployment {} reverted",
        kind.name(),
        hash
    );
    let address = receipt
        .contract_address
        .with_context(|| format!("{} deployment receipt has no contract address", kind.name()))?;
    info!(contract = kind.name(), %address, tx = %hash, "✅ Contract deployed");
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_sol_types::SolCall;

    #[test]
    fn test_embedded_bytecode_decodes() {
        for kind in [
            ContractKind::LoadTester,
            ContractKind::Erc20,
            ContractKind::Erc721,
        ] {
            let code = kind.bytecode().unwrap();
            assert!(code.len() > 100, "{} bytecode too short", kind.name());
        }
    }

    #[test]
    fn test_selectors_match_recall_filters() {
        assert_eq!(IERC20::balanceOfCall::SELECTOR, [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(IERC721::tokenURICall::SELECTOR, [0xc8, 0x7b, 0x56, 0xdd]);
    }

    #[test]
    fn test_store_call_encodes_payload() {
        let input = LoadTester::storeCall {
            data: vec![0xaa; 64].into(),
        }
        .abi_encode();
        // selector + offset + length + 64 bytes
        assert_eq!(input.len(), 4 + 32 + 32 + 64);
    }
}
