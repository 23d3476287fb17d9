use async_trait::async_trait;
use loadtest_core::gas::pricer::{DynamicGasPricer, GasPricer};
use loadtest_core::{
    BlockHeaderInfo, BlockWatcher, GasVault, HeaderSource, OscillatingGasProvider, Wave,
    WaveConfig, WaveShape,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct SteppingChain {
    head: AtomicU64,
}

#[async_trait]
impl HeaderSource for SteppingChain {
    async fn latest_header(&self) -> anyhow::Result<BlockHeaderInfo> {
        // Every poll sees a new block.
        let number = self.head.fetch_add(1, Ordering::SeqCst);
        Ok(BlockHeaderInfo {
            number,
            ..Default::default()
        })
    }

    async fn header_by_number(&self, number: u64) -> anyhow::Result<BlockHeaderInfo> {
        Ok(BlockHeaderInfo {
            number,
            ..Default::default()
        })
    }
}

/// Square wave with period 10 deposits 15M for five blocks, then 5M.
#[tokio::test(start_paused = true)]
async fn test_square_wave_feeds_vault_per_block() {
    let wave = Wave::new(
        WaveShape::Square,
        WaveConfig {
            period: 10,
            amplitude: 5_000_000,
            target: 10_000_000,
        },
    )
    .unwrap();
    let vault = Arc::new(GasVault::new());
    let provider = Arc::new(OscillatingGasProvider::new(wave, Some(vault.clone())));
    let chain = Arc::new(SteppingChain {
        head: AtomicU64::new(1),
    });

    let token = CancellationToken::new();
    let watcher = BlockWatcher::new(chain)
        .with_observer(provider)
        .with_poll_interval(Duration::from_secs(1));
    let handle = tokio::spawn(watcher.run(token.clone()));

    // The interval fires immediately, then once per second.
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert_eq!(vault.available(), 5 * 15_000_000);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(vault.available(), 5 * 15_000_000 + 5 * 5_000_000);

    token.cancel();
    handle.await.unwrap();
}

/// Workers spending 21k each can only get as many transfers through as the
/// budget allows.
#[tokio::test]
async fn test_vault_throttles_spenders() {
    let vault = Arc::new(GasVault::new());
    vault.add_gas(21_000 * 3);
    let token = CancellationToken::new();

    for _ in 0..3 {
        vault.spend_or_wait(&token, 21_000).await.unwrap();
    }
    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        vault.spend_or_wait(&token, 21_000),
    )
    .await;
    assert!(blocked.is_err(), "fourth spend should wait for a deposit");
    assert_eq!(vault.available(), 0);
}

#[test]
fn test_dynamic_pricer_is_shareable_across_threads() {
    let pricer = Arc::new(DynamicGasPricer::with_seed(vec![100, 200, 300, 400], 0.0, 7).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pricer = pricer.clone();
            std::thread::spawn(move || (0..100).map(|_| pricer.gas_price().unwrap()).sum::<u64>())
        })
        .collect();
    let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    // 400 calls spread evenly over the four prices.
    assert_eq!(total, 100 * (100 + 200 + 300 + 400));
}
