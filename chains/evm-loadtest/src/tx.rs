//! Transaction building and signing.
//!
//! Every mode describes what it wants to send as a [`TxCall`]; the worker
//! supplies the sender, nonce and fees as [`TxOpts`]. Signing happens locally
//! and produces EIP-2718 bytes ready for `eth_sendRawTransaction`.

use crate::account_pool::Account;
use alloy::consensus::{
    SidecarBuilder, SignableTransaction, SimpleCoder, TxEip1559, TxEip4844, TxEip4844Variant,
    TxEip4844WithSidecar, TxEnvelope, TxLegacy,
};
use alloy::eips::eip2718::Encodable2718;
use alloy::eips::eip7594::BlobTransactionSidecarVariant;
use alloy::network::TxSignerSync;
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256, Bytes, TxKind, U256};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Gas used by a plain value transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// Chain parameters fetched once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    pub chain_id: u64,
    /// Sign type-0 transactions instead of EIP-1559 ones.
    pub legacy: bool,
}

/// Fee fields of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeParams {
    Legacy {
        gas_price: u128,
    },
    Dynamic {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl FeeParams {
    /// Highest price per gas the transaction may pay.
    pub fn max_price(&self) -> u128 {
        match *self {
            FeeParams::Legacy { gas_price } => gas_price,
            FeeParams::Dynamic {
                max_fee_per_gas, ..
            } => max_fee_per_gas,
        }
    }

    /// Same price expressed as a legacy gas price.
    pub fn as_legacy(&self) -> FeeParams {
        FeeParams::Legacy {
            gas_price: self.max_price(),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, FeeParams::Legacy { .. })
    }
}

/// What a mode wants to send.
#[derive(Debug, Clone)]
pub struct TxCall {
    pub to: TxKind,
    pub input: Bytes,
    pub value: U256,
    /// Fixed gas limit; estimated when `None` and nothing is forced.
    pub gas_limit: Option<u64>,
    /// Block to run `eth_call` against in call-only runs.
    pub call_block: Option<u64>,
}

impl TxCall {
    pub fn call(to: Address, input: impl Into<Bytes>) -> Self {
        Self {
            to: TxKind::Call(to),
            input: input.into(),
            value: U256::ZERO,
            gas_limit: None,
            call_block: None,
        }
    }

    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            to: TxKind::Call(to),
            input: Bytes::new(),
            value,
            gas_limit: Some(TRANSFER_GAS),
            call_block: None,
        }
    }

    pub fn create(code: impl Into<Bytes>) -> Self {
        Self {
            to: TxKind::Create,
            input: code.into(),
            value: U256::ZERO,
            gas_limit: None,
            call_block: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Call message for `eth_call` / `eth_estimateGas`.
    pub fn to_request(&self, from: Address) -> TransactionRequest {
        TransactionRequest {
            from: Some(from),
            to: Some(self.to),
            value: Some(self.value),
            input: TransactionInput::new(self.input.clone()),
            ..Default::default()
        }
    }
}

/// Per-request signing context built by the worker.
#[derive(Debug, Clone)]
pub struct TxOpts {
    pub account: Arc<Account>,
    pub nonce: u64,
    pub chain_id: u64,
    pub fees: FeeParams,
    /// Forced gas limit, overriding both the mode and estimation.
    pub gas_limit: Option<u64>,
}

impl TxOpts {
    pub fn from(&self) -> Address {
        self.account.address()
    }
}

#[derive(Debug, Clone)]
pub struct SignedTx {
    pub hash: B256,
    pub raw: Vec<u8>,
}

impl SignedTx {
    fn from_envelope(envelope: TxEnvelope) -> Self {
        Self {
            hash: *envelope.tx_hash(),
            raw: envelope.encoded_2718(),
        }
    }

    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

/// Signs `call` as a legacy or EIP-1559 transaction depending on the fees.
pub fn sign_call(
    signer: &PrivateKeySigner,
    call: &TxCall,
    nonce: u64,
    chain_id: u64,
    fees: FeeParams,
    gas_limit: u64,
) -> Result<SignedTx> {
    let envelope: TxEnvelope = match fees {
        FeeParams::Legacy { gas_price } => {
            let mut tx = TxLegacy {
                chain_id: Some(chain_id),
                nonce,
                gas_price,
                gas_limit,
                to: call.to,
                value: call.value,
                input: call.input.clone(),
            };
            let signature = signer
                .sign_transaction_sync(&mut tx)
                .context("Failed to sign legacy transaction")?;
            tx.into_signed(signature).into()
        }
        FeeParams::Dynamic {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            let mut tx = TxEip1559 {
                chain_id,
                nonce,
                gas_limit,
                max_fee_per_gas,
                max_priority_fee_per_gas,
                to: call.to,
                value: call.value,
                access_list: Default::default(),
                input: call.input.clone(),
            };
            let signature = signer
                .sign_transaction_sync(&mut tx)
                .context("Failed to sign dynamic fee transaction")?;
            tx.into_signed(signature).into()
        }
    };
    Ok(SignedTx::from_envelope(envelope))
}

/// Parameters of an EIP-4844 transaction beyond the plain call.
#[derive(Debug, Clone)]
pub struct BlobParams {
    pub to: Address,
    pub value: U256,
    pub max_fee_per_blob_gas: u128,
    pub payload: Vec<u8>,
}

/// Encodes `payload` into blobs and signs a type-3 transaction carrying
/// them. Legacy fees are rejected.
pub fn sign_blob(
    signer: &PrivateKeySigner,
    params: &BlobParams,
    nonce: u64,
    chain_id: u64,
    fees: FeeParams,
    gas_limit: u64,
) -> Result<SignedTx> {
    let FeeParams::Dynamic {
        max_fee_per_gas,
        max_priority_fee_per_gas,
    } = fees
    else {
        anyhow::bail!("blob transactions require dynamic fees");
    };

    let sidecar = BlobTransactionSidecarVariant::Eip4844(
        SidecarBuilder::<SimpleCoder>::from_slice(&params.payload)
            .build()
            .context("Failed to build blob sidecar")?,
    );

    let tx = TxEip4844 {
        chain_id,
        nonce,
        gas_limit,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        to: params.to,
        value: params.value,
        access_list: Default::default(),
        blob_versioned_hashes: sidecar.versioned_hashes().collect(),
        max_fee_per_blob_gas: params.max_fee_per_blob_gas,
        input: Bytes::new(),
    };
    let mut tx = TxEip4844Variant::TxEip4844WithSidecar(TxEip4844WithSidecar::from_tx_and_sidecar(
        tx, sidecar,
    ));
    let signature = signer
        .sign_transaction_sync(&mut tx)
        .context("Failed to sign blob transaction")?;
    Ok(SignedTx::from_envelope(TxEnvelope::Eip4844(
        tx.into_signed(signature),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::consensus::Transaction as _;
    use alloy::eips::eip2718::Decodable2718;

    fn signer() -> PrivateKeySigner {
        PrivateKeySigner::from_bytes(&B256::with_last_byte(7)).unwrap()
    }

    #[test]
    fn test_dynamic_fee_tx_round_trips() {
        let call = TxCall::transfer(Address::with_last_byte(0xde), U256::from(1u64));
        let fees = FeeParams::Dynamic {
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        };
        let signed = sign_call(&signer(), &call, 5, 1337, fees, 21_000).unwrap();

        let decoded = TxEnvelope::decode_2718(&mut signed.raw.as_slice()).unwrap();
        assert_eq!(decoded.encoded_2718(), signed.raw);
        assert_eq!(*decoded.tx_hash(), signed.hash);
        assert_eq!(decoded.nonce(), 5);
        assert_eq!(decoded.chain_id(), Some(1337));
        assert_eq!(decoded.max_fee_per_gas(), 30_000_000_000);
        assert!(decoded.is_eip1559());
    }

    #[test]
    fn test_legacy_fees_sign_type_zero() {
        let call = TxCall::call(Address::with_last_byte(1), vec![0xde, 0xad]);
        let fees = FeeParams::Legacy {
            gas_price: 5_000_000_000,
        };
        let signed = sign_call(&signer(), &call, 0, 1, fees, 50_000).unwrap();

        let decoded = TxEnvelope::decode_2718(&mut signed.raw.as_slice()).unwrap();
        assert!(decoded.is_legacy());
        assert_eq!(decoded.gas_price(), Some(5_000_000_000));
        assert_eq!(decoded.input().as_ref(), &[0xde, 0xad]);
        assert!(signed.raw_hex().starts_with("0x"));
    }

    #[test]
    fn test_blob_rejects_legacy_fees() {
        let params = BlobParams {
            to: Address::ZERO,
            value: U256::ZERO,
            max_fee_per_blob_gas: 1,
            payload: vec![1, 2, 3],
        };
        let fees = FeeParams::Legacy { gas_price: 1 };
        assert!(sign_blob(&signer(), &params, 0, 1, fees, 21_000).is_err());
    }

    #[test]
    fn test_fee_conversion_to_legacy() {
        let fees = FeeParams::Dynamic {
            max_fee_per_gas: 10,
            max_priority_fee_per_gas: 2,
        };
        assert_eq!(fees.as_legacy(), FeeParams::Legacy { gas_price: 10 });
        assert!(!fees.is_legacy());
    }
}
