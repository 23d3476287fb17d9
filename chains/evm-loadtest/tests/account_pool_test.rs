use evm_loadtest::{Account, AccountPool};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

const KEY_A: &str = "0x42b6e34dc21598a807dc19d7784c71b2a7a01f6480dc6f58258f78e539f1a1fa";
const KEY_B: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[test]
fn test_seed_derivation_is_deterministic() {
    let a = AccountPool::derive_from_seed(123_456, 4).unwrap();
    let b = AccountPool::derive_from_seed(123_456, 4).unwrap();
    let c = AccountPool::derive_from_seed(7, 4).unwrap();

    let addresses = |pool: &AccountPool| -> Vec<_> {
        pool.accounts().iter().map(|a| a.address()).collect()
    };
    assert_eq!(addresses(&a), addresses(&b));
    assert_ne!(addresses(&a), addresses(&c));
    assert_eq!(addresses(&a).iter().collect::<HashSet<_>>().len(), 4);
}

#[test]
fn test_key_file_skips_comments_and_blank_lines() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# sending accounts\n{}\n\n  {}  \n", KEY_A, KEY_B).unwrap();

    let pool = AccountPool::from_key_file(file.path()).unwrap();
    assert_eq!(pool.len(), 2);
    assert_eq!(
        pool.accounts()[0].address(),
        Account::from_hex(KEY_A).unwrap().address()
    );
}

#[test]
fn test_key_file_rejects_garbage() {
    let err = AccountPool::parse_keys("# ok\nnot-a-key\n").unwrap_err();
    assert!(format!("{:#}", err).contains("line 2"));

    let empty = tempfile::NamedTempFile::new().unwrap();
    assert!(AccountPool::from_key_file(empty.path()).is_err());
}

#[test]
fn test_dump_writes_one_account_per_line() {
    let pool = AccountPool::derive_from_seed(1, 3).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.ndjson");
    pool.dump_ndjson(&path).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    for (line, account) in lines.iter().zip(pool.accounts()) {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        let dumped = value["address"].as_str().unwrap().to_lowercase();
        assert_eq!(dumped, account.address().to_string().to_lowercase());
        let key = value["privateKey"].as_str().unwrap();
        assert!(key.starts_with("0x"));
        assert_eq!(
            Account::from_hex(key).unwrap().address(),
            account.address()
        );
    }
}

#[test]
fn test_concurrent_nonces_are_unique_and_contiguous() {
    let account = Arc::new(Account::from_hex(KEY_A).unwrap());
    account.set_start_nonce(100);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let account = account.clone();
            std::thread::spawn(move || (0..250).map(|_| account.issue_nonce()).collect::<Vec<_>>())
        })
        .collect();
    let mut nonces: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    nonces.sort_unstable();

    assert_eq!(nonces, (100..2_100).collect::<Vec<_>>());
    assert_eq!(account.issued(), 2_000);
    assert_eq!(account.next_nonce(), 2_100);
}

#[test]
fn test_single_pool_shares_one_counter() {
    let account = Arc::new(Account::from_hex(KEY_B).unwrap());
    let pool = AccountPool::single(account.clone());
    for index in 0..10 {
        pool.pick(index).issue_nonce();
    }
    assert_eq!(pool.total_issued(), 10);
    assert_eq!(account.issued(), 10);
    assert!(!account.is_funded());
}

#[test]
fn test_duplicate_keys_share_one_account() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}\n{}\n{}", KEY_A, KEY_B, KEY_A.trim_start_matches("0x")).unwrap();

    let pool = AccountPool::from_key_file(file.path()).unwrap();
    assert_eq!(pool.len(), 2);
    let unique: HashSet<_> = pool.accounts().iter().map(|a| a.address()).collect();
    assert_eq!(unique.len(), 2);
}

#[test]
fn test_main_account_in_key_file_keeps_one_counter() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}\n{}", KEY_B, KEY_A).unwrap();

    let driver = Arc::new(Account::from_hex(KEY_A).unwrap());
    driver.set_start_nonce(7);
    let pool = AccountPool::from_key_file(file.path())
        .unwrap()
        .share_account(&driver);

    assert_eq!(pool.len(), 2);
    assert!(Arc::ptr_eq(&pool.accounts()[1], &driver));
    assert_eq!(pool.pick(1).issue_nonce(), 7);
    assert_eq!(driver.issue_nonce(), 8);
    assert_eq!(pool.total_issued(), 2);
}
