use alloy_primitives::{Address, B256, Bytes, U256};
use evm_loadtest::recall::{ERC20_BALANCE_OF_SELECTOR, ERC721_TOKEN_URI_SELECTOR};
use evm_loadtest::{RecallIndex, RecalledTx};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn tx(hash: u8, from: u8, to: Option<u8>, input: Vec<u8>) -> RecalledTx {
    RecalledTx {
        hash: B256::with_last_byte(hash),
        from: Address::with_last_byte(from),
        to: to.map(Address::with_last_byte),
        value: U256::ZERO,
        input: Bytes::from(input),
        gas_limit: 100_000,
        tx_type: 2,
        block_number: Some(10),
    }
}

fn call(selector: [u8; 4]) -> Vec<u8> {
    let mut input = selector.to_vec();
    input.extend_from_slice(&[0u8; 32]);
    input
}

fn sample_index() -> RecallIndex {
    let blocks = [
        (10, B256::with_last_byte(0xa0)),
        (11, B256::with_last_byte(0xa1)),
        (11, B256::with_last_byte(0xa1)),
    ];
    let transactions = vec![
        tx(1, 1, Some(2), vec![]),
        tx(2, 1, Some(20), call(ERC20_BALANCE_OF_SELECTOR)),
        tx(3, 3, Some(21), call(ERC721_TOKEN_URI_SELECTOR)),
        tx(4, 3, Some(20), call(ERC20_BALANCE_OF_SELECTOR)),
        tx(5, 4, None, vec![0x60, 0x80, 0x60, 0x40, 0x52]),
        tx(6, 4, Some(30), vec![0xde, 0xad]),
    ];
    RecallIndex::from_parts(blocks, transactions)
}

#[test]
fn test_index_deduplicates() {
    let index = sample_index();
    assert_eq!(index.block_numbers(), &[10, 11]);
    assert_eq!(index.block_hashes().len(), 2);
    assert_eq!(index.tx_hashes().len(), 6);
    assert_eq!(index.transactions().len(), 6);

    let addresses = index.addresses();
    let unique: std::collections::HashSet<_> = addresses.iter().collect();
    assert_eq!(unique.len(), addresses.len());
    // Senders 1, 3, 4 and recipients 2, 20, 21, 30.
    assert_eq!(addresses.len(), 7);
}

#[test]
fn test_contracts_are_classified_by_selector() {
    let index = sample_index();
    assert_eq!(index.erc20_addresses(), &[Address::with_last_byte(20)]);
    assert_eq!(index.erc721_addresses(), &[Address::with_last_byte(21)]);
    // Short calldata does not make a contract; creations have no address.
    assert!(!index.contracts().contains(&Address::with_last_byte(30)));
    assert!(!index.contracts().contains(&Address::with_last_byte(2)));
    assert!(index.contracts().contains(&Address::with_last_byte(20)));
}

#[test]
fn test_random_accessors_draw_from_the_index() {
    let index = sample_index();
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..20 {
        let picked = index.random_transaction(&mut rng).unwrap();
        assert!(index.transactions().contains(picked));
        assert!(index
            .block_numbers()
            .contains(&index.random_block_number(&mut rng).unwrap()));
        assert!(index
            .addresses()
            .contains(&index.random_address(&mut rng).unwrap()));
        assert_eq!(
            index.random_erc20_address(&mut rng),
            Some(Address::with_last_byte(20))
        );
    }
}

#[test]
fn test_empty_index() {
    let index = RecallIndex::default();
    let mut rng = StdRng::seed_from_u64(1);
    assert!(index.is_empty());
    assert!(index.random_transaction(&mut rng).is_none());
    assert!(index.random_block_hash(&mut rng).is_none());
    assert!(index.random_erc721_address(&mut rng).is_none());
}

#[test]
fn test_legacy_priced_types() {
    let mut original = tx(1, 1, Some(2), vec![]);
    for (ty, legacy) in [(0, true), (1, true), (2, false), (3, false), (4, false)] {
        original.tx_type = ty;
        assert_eq!(original.is_legacy_priced(), legacy, "type {}", ty);
    }
}

#[test]
fn test_backfill_only_fills_empty_token_lists() {
    let own_erc20 = Address::with_last_byte(0xe2);
    let own_erc721 = Address::with_last_byte(0xe7);

    let mut index = sample_index();
    index.backfill_tokens(Some(own_erc20), Some(own_erc721));
    assert_eq!(index.erc20_addresses(), &[Address::with_last_byte(20)]);
    assert_eq!(index.erc721_addresses(), &[Address::with_last_byte(21)]);

    let mut index = RecallIndex::default();
    index.backfill_tokens(Some(own_erc20), None);
    assert_eq!(index.erc20_addresses(), &[own_erc20]);
    assert!(index.erc721_addresses().is_empty());
}
