//! Block polling and the oscillating gas provider.
//!
//! [`BlockWatcher`] polls a [`HeaderSource`] and hands every newly observed
//! header to its observers in block order. The gas provider and the adaptive
//! rate controller are both observers, so one poll loop serves both.

use super::vault::GasVault;
use super::wave::Wave;
use crate::traits::{BlockHeaderInfo, HeaderObserver, HeaderSource};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Missed blocks older than this are not replayed after a slow poll.
const MAX_GAP_FILL: u64 = 32;

pub struct BlockWatcher {
    source: Arc<dyn HeaderSource>,
    observers: Vec<Arc<dyn HeaderObserver>>,
    poll_interval: Duration,
    last_seen: Option<u64>,
}

impl BlockWatcher {
    pub fn new(source: Arc<dyn HeaderSource>) -> Self {
        Self {
            source,
            observers: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_seen: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn HeaderObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    /// Polls until `token` is cancelled. Fetch errors are logged and the
    /// next tick simply tries again.
    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Block watcher stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "Failed to fetch latest block header");
            }
        }
    }

    /// One polling step. Returns the number of headers dispatched.
    pub async fn poll_once(&mut self) -> anyhow::Result<usize> {
        let latest = self.source.latest_header().await?;

        let first_missing = match self.last_seen {
            Some(last) if latest.number <= last => return Ok(0),
            Some(last) => (last + 1).max(latest.number.saturating_sub(MAX_GAP_FILL)),
            None => latest.number,
        };

        let mut dispatched = 0;
        for number in first_missing..latest.number {
            match self.source.header_by_number(number).await {
                Ok(header) => {
                    self.dispatch(&header);
                    dispatched += 1;
                }
                Err(e) => {
                    warn!(block = number, error = %e, "Failed to fetch missed block header");
                    break;
                }
            }
        }

        self.dispatch(&latest);
        Ok(dispatched + 1)
    }

    fn dispatch(&mut self, header: &BlockHeaderInfo) {
        debug!(
            block = header.number,
            gas_used = header.gas_used,
            "New block observed"
        );
        for observer in &self.observers {
            observer.on_new_header(header);
        }
        self.last_seen = Some(header.number);
    }
}

/// Deposits `floor(wave.y())` into the vault on every new block, then
/// advances the wave. Without a vault only the wave moves.
#[derive(Debug)]
pub struct OscillatingGasProvider {
    wave: Mutex<Wave>,
    vault: Option<Arc<GasVault>>,
}

impl OscillatingGasProvider {
    pub fn new(wave: Wave, vault: Option<Arc<GasVault>>) -> Self {
        Self {
            wave: Mutex::new(wave),
            vault,
        }
    }

    pub fn vault(&self) -> Option<&Arc<GasVault>> {
        self.vault.as_ref()
    }

    pub fn position(&self) -> f64 {
        self.wave.lock().unwrap_or_else(|e| e.into_inner()).x()
    }
}

impl HeaderObserver for OscillatingGasProvider {
    fn name(&self) -> &'static str {
        "gas-provider"
    }

    fn on_new_header(&self, header: &BlockHeaderInfo) {
        let mut wave = self.wave.lock().unwrap_or_else(|e| e.into_inner());
        let y = wave.y();
        if let Some(vault) = &self.vault {
            let amount = y.max(0.0).floor() as u64;
            vault.add_gas(amount);
            debug!(
                block = header.number,
                x = wave.x(),
                amount,
                available = vault.available(),
                "Gas budget deposited"
            );
        }
        wave.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::wave::{WaveConfig, WaveShape};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeChain {
        head: AtomicU64,
        fail: std::sync::atomic::AtomicBool,
    }

    impl FakeChain {
        fn new(head: u64) -> Self {
            Self {
                head: AtomicU64::new(head),
                fail: Default::default(),
            }
        }

        fn header(number: u64) -> BlockHeaderInfo {
            BlockHeaderInfo {
                number,
                gas_used: number * 1_000,
                gas_limit: 30_000_000,
                base_fee: Some(7),
            }
        }
    }

    #[async_trait]
    impl HeaderSource for FakeChain {
        async fn latest_header(&self) -> anyhow::Result<BlockHeaderInfo> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            Ok(Self::header(self.head.load(Ordering::SeqCst)))
        }

        async fn header_by_number(&self, number: u64) -> anyhow::Result<BlockHeaderInfo> {
            Ok(Self::header(number))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u64>>);

    impl HeaderObserver for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn on_new_header(&self, header: &BlockHeaderInfo) {
            self.0.lock().unwrap().push(header.number);
        }
    }

    fn square_wave() -> Wave {
        Wave::new(
            WaveShape::Square,
            WaveConfig {
                period: 4,
                amplitude: 50,
                target: 100,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_watcher_dispatches_only_new_blocks_in_order() {
        let chain = Arc::new(FakeChain::new(10));
        let recorder = Arc::new(Recorder::default());
        let mut watcher = BlockWatcher::new(chain.clone()).with_observer(recorder.clone());

        assert_eq!(watcher.poll_once().await.unwrap(), 1);
        assert_eq!(watcher.poll_once().await.unwrap(), 0);

        chain.head.store(13, Ordering::SeqCst);
        assert_eq!(watcher.poll_once().await.unwrap(), 3);

        assert_eq!(*recorder.0.lock().unwrap(), vec![10, 11, 12, 13]);
    }

    #[tokio::test]
    async fn test_watcher_caps_gap_fill() {
        let chain = Arc::new(FakeChain::new(1));
        let recorder = Arc::new(Recorder::default());
        let mut watcher = BlockWatcher::new(chain.clone()).with_observer(recorder.clone());

        watcher.poll_once().await.unwrap();
        chain.head.store(1_000, Ordering::SeqCst);
        let dispatched = watcher.poll_once().await.unwrap();

        assert_eq!(dispatched as u64, MAX_GAP_FILL + 1);
        assert_eq!(recorder.0.lock().unwrap().last(), Some(&1_000));
    }

    #[tokio::test]
    async fn test_watcher_survives_fetch_errors() {
        let chain = Arc::new(FakeChain::new(5));
        chain.fail.store(true, Ordering::SeqCst);
        let mut watcher = BlockWatcher::new(chain.clone());

        assert!(watcher.poll_once().await.is_err());
        chain.fail.store(false, Ordering::SeqCst);
        assert_eq!(watcher.poll_once().await.unwrap(), 1);
    }

    #[test]
    fn test_provider_deposits_wave_samples() {
        let vault = Arc::new(GasVault::new());
        let provider = OscillatingGasProvider::new(square_wave(), Some(vault.clone()));

        let mut expected = 0;
        for (n, y) in [150u64, 150, 50, 50, 150].into_iter().enumerate() {
            provider.on_new_header(&FakeChain::header(n as u64));
            expected += y;
            assert_eq!(vault.available(), expected);
        }
    }

    #[test]
    fn test_provider_without_vault_still_advances() {
        let provider = OscillatingGasProvider::new(square_wave(), None);
        provider.on_new_header(&FakeChain::header(1));
        provider.on_new_header(&FakeChain::header(2));
        assert_eq!(provider.position(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let chain = Arc::new(FakeChain::new(1));
        let recorder = Arc::new(Recorder::default());
        let watcher = BlockWatcher::new(chain.clone()).with_observer(recorder.clone());
        let token = CancellationToken::new();

        let handle = tokio::spawn(watcher.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        chain.head.store(2, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(*recorder.0.lock().unwrap(), vec![1, 2]);
    }
}
