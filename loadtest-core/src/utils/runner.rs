use crate::traits::WorkerStats;
use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

/// Shared source of request indices. Workers pull from it until it runs dry,
/// so no central dispatcher is needed.
#[derive(Debug)]
pub struct RequestCounter {
    next: AtomicU64,
    total: u64,
}

impl RequestCounter {
    pub fn new(total: u64) -> Self {
        Self {
            next: AtomicU64::new(0),
            total,
        }
    }

    /// Claims the next request index, `None` once `total` are claimed.
    pub fn next_index(&self) -> Option<u64> {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            if current >= self.total {
                return None;
            }
            match self.next.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(current),
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of indices handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed).min(self.total)
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Cancels `token` on Ctrl+C or, when given, once `time_limit` elapses.
pub fn spawn_shutdown_triggers(token: CancellationToken, time_limit: Option<Duration>) {
    let cloned_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cloned_token.cancelled() => {}
            res = signal::ctrl_c() => match res {
                Ok(()) => {
                    info!("🛑 Received Ctrl+C. Initiating graceful shutdown...");
                    cloned_token.cancel();
                }
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            },
        }
    });

    if let Some(limit) = time_limit {
        spawn_time_limit(token, limit);
    }
}

/// Cancels `token` once `limit` elapses, unless it was cancelled before.
pub fn spawn_time_limit(token: CancellationToken, limit: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                info!(seconds = limit.as_secs_f64(), "⏱ Time limit reached, stopping workers");
                token.cancel();
            }
        }
    });
}

pub struct WorkerRunner;

impl WorkerRunner {
    /// Spawns `count` workers, each inside its own `worker` span, and waits
    /// for all of them. Worker ids start at 1.
    pub async fn run<F, Fut>(count: usize, token: CancellationToken, spawn: F) -> WorkerStats
    where
        F: Fn(usize, CancellationToken) -> Fut,
        Fut: Future<Output = Result<WorkerStats>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        let start_time = tokio::time::Instant::now();
        info!("Starting {} load test workers...", count);

        for i in 0..count {
            let id = i + 1;
            let span = tracing::info_span!("worker", worker_id = format!("{:03}", id));
            let worker = spawn(id, token.child_token());

            set.spawn(
                async move {
                    match worker.await {
                        Ok(stats) => Ok(stats),
                        Err(e) => {
                            error!("Worker {} failed: {:?}", id, e);
                            Err(e)
                        }
                    }
                }
                .instrument(span),
            );
        }

        let mut total = WorkerStats::default();
        while let Some(res) = set.join_next().await {
            match res {
                Ok(Ok(stats)) => total.merge(stats),
                Ok(Err(_)) => {
                    // Already logged in the worker span
                }
                Err(e) => error!("A worker task panicked or failed to join: {:?}", e),
            }
        }

        let elapsed = start_time.elapsed();
        let rate = if total.total() > 0 {
            (total.success as f64 / total.total() as f64) * 100.0
        } else {
            0.0
        };

        if token.is_cancelled() {
            warn!("Workers stopped by cancellation");
        }
        info!(
            "Workers done. Time: {:.1}s | Success: {} | Fail: {} | Success Rate: {:.2}%",
            elapsed.as_secs_f64(),
            total.success,
            total.failed,
            rate
        );

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_counter_stops_at_total() {
        let counter = RequestCounter::new(3);
        assert_eq!(counter.next_index(), Some(0));
        assert_eq!(counter.next_index(), Some(1));
        assert_eq!(counter.next_index(), Some(2));
        assert_eq!(counter.next_index(), None);
        assert_eq!(counter.issued(), 3);
    }

    #[test]
    fn test_zero_requests_yield_nothing() {
        let counter = RequestCounter::new(0);
        assert_eq!(counter.next_index(), None);
        assert_eq!(counter.issued(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_workers_drain_counter_without_duplicates() {
        let counter = Arc::new(RequestCounter::new(1_000));
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let stats = WorkerRunner::run(8, CancellationToken::new(), |_, _| {
            let counter = counter.clone();
            let seen = seen.clone();
            async move {
                let mut stats = WorkerStats::default();
                while let Some(k) = counter.next_index() {
                    assert!(seen.lock().unwrap().insert(k));
                    stats.success += 1;
                    tokio::task::yield_now().await;
                }
                Ok(stats)
            }
        })
        .await;

        assert_eq!(stats.success, 1_000);
        assert_eq!(seen.lock().unwrap().len(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_limit_cancels_token() {
        let token = CancellationToken::new();
        spawn_shutdown_triggers(token.clone(), Some(Duration::from_secs(2)));
        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert!(!token.is_cancelled());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(token.is_cancelled());
    }
}
