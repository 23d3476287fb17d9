//! Receipt Tracker - background receipt polling off the hot path
//!
//! Workers hand submitted hashes to [`ReceiptTracker::enqueue`], which never
//! blocks: the queue is bounded and a full queue drops the hash with a
//! warning. A background task polls `eth_getTransactionReceipt` for every
//! hash with exponential backoff and merges the outcome into [`Telemetry`].
//!
//! When preconfirmation checks are enabled the same task also polls
//! `eth_checkPreconfStatus` next to the receipt and feeds the
//! [`PreconfTracker`].

use crate::client::EvmClient;
use crate::preconf::{PreconfObservation, PreconfTracker};
use alloy::network::ReceiptResponse as _;
use alloy::rpc::types::TransactionReceipt;
use alloy_primitives::B256;
use anyhow::{Context, Result};
use loadtest_core::config::ReceiptConfig;
use loadtest_core::{
    CoreError, PollOutcome, PreconfStats, ReceiptStatus, RetryConfig, Telemetry,
    poll_with_backoff,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAX_RECEIPT_DELAY_MS: u64 = 30_000;

/// Polls until `hash` has a receipt, failing once `retry` is exhausted.
pub async fn await_receipt(
    client: &EvmClient,
    hash: B256,
    retry: RetryConfig,
    token: &CancellationToken,
) -> Result<TransactionReceipt> {
    match poll_with_backoff(retry, token, || client.receipt(hash)).await? {
        PollOutcome::Ready(receipt) => Ok(receipt),
        PollOutcome::Exhausted { attempts } => {
            anyhow::bail!("No receipt for {} after {} attempts", hash, attempts)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingHash {
    hash: B256,
    submitted_at: Instant,
}

/// Settings for the background polling task.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub wait_for_receipt: bool,
    pub receipt_retry: RetryConfig,
    /// Bounded queue size, also the number of concurrent polls.
    pub capacity: usize,
}

impl TrackerSettings {
    pub fn from_config(config: &ReceiptConfig, concurrency: u64) -> Self {
        Self {
            wait_for_receipt: config.wait,
            receipt_retry: RetryConfig::new(config.max_retry, config.initial_delay_ms)
                .with_max_delay(MAX_RECEIPT_DELAY_MS)
                .without_jitter(),
            capacity: (concurrency.max(1) as usize).saturating_mul(4),
        }
    }
}

pub struct ReceiptTracker {
    sender: mpsc::Sender<PendingHash>,
    closing: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReceiptTracker {
    /// Starts the polling task. `token` aborts outstanding polls; closing
    /// the queue is done with [`ReceiptTracker::drain`].
    pub fn spawn(
        client: EvmClient,
        telemetry: Arc<Telemetry>,
        preconf: Option<Arc<PreconfTracker>>,
        settings: TrackerSettings,
        token: CancellationToken,
    ) -> Self {
        let capacity = settings.capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let closing = CancellationToken::new();
        let poller = Poller {
            client,
            telemetry,
            preconf,
            settings,
            token,
        };
        let handle = tokio::spawn(poller.run(receiver, closing.clone(), capacity));
        Self {
            sender,
            closing,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queues `hash` for polling. Returns false when the queue is full or
    /// closed; the hash is then left untracked.
    pub fn enqueue(&self, hash: B256) -> bool {
        let entry = PendingHash {
            hash,
            submitted_at: Instant::now(),
        };
        match self.sender.try_send(entry) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%hash, "Receipt queue saturated, dropping hash");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%hash, "Receipt queue closed, dropping hash");
                false
            }
        }
    }

    /// Stops accepting hashes and waits until every queued hash was polled.
    pub async fn drain(&self) {
        self.closing.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Receipt tracker task failed");
            }
        }
    }
}

struct Poller {
    client: EvmClient,
    telemetry: Arc<Telemetry>,
    preconf: Option<Arc<PreconfTracker>>,
    settings: TrackerSettings,
    token: CancellationToken,
}

impl Poller {
    async fn run(
        self,
        mut receiver: mpsc::Receiver<PendingHash>,
        closing: CancellationToken,
        capacity: usize,
    ) {
        let this = Arc::new(self);
        let permits = Arc::new(Semaphore::new(capacity));
        let mut polls = JoinSet::new();
        let mut closed = false;

        loop {
            let next = if closed {
                receiver.recv().await
            } else {
                tokio::select! {
                    entry = receiver.recv() => entry,
                    _ = closing.cancelled() => {
                        closed = true;
                        receiver.close();
                        continue;
                    }
                }
            };
            let Some(entry) = next else { break };

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let this = this.clone();
            polls.spawn(async move {
                this.track(entry).await;
                drop(permit);
            });
            while polls.try_join_next().is_some() {}
        }

        let outstanding = polls.len();
        if outstanding > 0 {
            info!(outstanding, "⏳ Waiting for outstanding receipts");
        }
        while polls.join_next().await.is_some() {}
    }

    async fn track(&self, entry: PendingHash) {
        let receipt = async {
            if !self.settings.wait_for_receipt && self.preconf.is_none() {
                return None;
            }
            let started = Instant::now();
            let outcome = self.poll_receipt(entry.hash).await;
            Some((outcome, started.elapsed()))
        };

        let (receipt, preconf) = match &self.preconf {
            Some(tracker) => {
                let start_block = self.client.block_number().await.ok();
                let (receipt, preconf) = tokio::join!(receipt, self.poll_preconf(entry.hash));
                (receipt, Some((tracker, preconf, start_block)))
            }
            None => (receipt.await, None),
        };

        let receipt = match receipt {
            Some((Ok(outcome), elapsed)) => Some((outcome, elapsed)),
            Some((Err(CoreError::Cancelled), _)) | None => None,
            Some((Err(e), _)) => {
                warn!(hash = %entry.hash, error = %e, "Receipt polling failed");
                None
            }
        };

        if self.settings.wait_for_receipt {
            if let Some((outcome, _)) = &receipt {
                let facts = match outcome {
                    PollOutcome::Ready(r) => PollOutcome::Ready(ReceiptFacts::from(r)),
                    PollOutcome::Exhausted { attempts } => PollOutcome::Exhausted {
                        attempts: *attempts,
                    },
                };
                merge_receipt(
                    &self.telemetry,
                    &entry.hash,
                    entry.submitted_at.elapsed(),
                    &facts,
                );
            }
        }

        if let Some((tracker, preconf, start_block)) = preconf {
            let observation = PreconfObservation {
                preconf,
                receipt: receipt.as_ref().and_then(|(outcome, elapsed)| match outcome {
                    PollOutcome::Ready(r) => Some((*elapsed, r.block_number.unwrap_or_default())),
                    PollOutcome::Exhausted { .. } => None,
                }),
                start_block,
            };
            self.telemetry.update_preconf(
                &entry.hash,
                PreconfStats {
                    confirmed: observation.preconf.is_some(),
                    latency_ms: observation.preconf.map_or(0, |d| d.as_millis() as u64),
                },
            );
            tracker.observe(observation);
        }
    }

    async fn poll_receipt(
        &self,
        hash: B256,
    ) -> Result<PollOutcome<TransactionReceipt>, CoreError> {
        poll_with_backoff(self.settings.receipt_retry, &self.token, || {
            self.client.receipt(hash)
        })
        .await
    }

    /// Time until the node reported a preconfirmation, `None` if it never
    /// did within the window.
    async fn poll_preconf(&self, hash: B256) -> Option<Duration> {
        let started = Instant::now();
        let retry = RetryConfig::new(20, 50).with_max_delay(5_000);
        let client = &self.client;
        let outcome = poll_with_backoff(retry, &self.token, move || async move {
            let confirmed = client
                .preconf_status(hash)
                .await
                .context("preconf status")?;
            Ok(confirmed.then_some(()))
        })
        .await;
        match outcome {
            Ok(PollOutcome::Ready(())) => Some(started.elapsed()),
            _ => None,
        }
    }
}

/// The parts of a receipt that end up in a [`loadtest_core::TxRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReceiptFacts {
    pub success: bool,
    pub gas_used: u64,
    pub block_number: Option<u64>,
}

impl From<&TransactionReceipt> for ReceiptFacts {
    fn from(receipt: &TransactionReceipt) -> Self {
        Self {
            success: receipt.status(),
            gas_used: receipt.gas_used,
            block_number: receipt.block_number,
        }
    }
}

/// Writes a polling outcome into the record of `hash`.
pub(crate) fn merge_receipt(
    telemetry: &Telemetry,
    hash: &B256,
    waited: Duration,
    outcome: &PollOutcome<ReceiptFacts>,
) {
    match outcome {
        PollOutcome::Ready(facts) => {
            let status = if facts.success {
                ReceiptStatus::Success
            } else {
                ReceiptStatus::Reverted
            };
            debug!(
                %hash,
                ?status,
                gas_used = facts.gas_used,
                waited_ms = waited.as_millis() as u64,
                "Receipt received"
            );
            telemetry.update_receipt(hash, status, Some(facts.gas_used), facts.block_number);
        }
        PollOutcome::Exhausted { attempts } => {
            warn!(%hash, attempts, "Receipt not found, giving up");
            telemetry.update_receipt(hash, ReceiptStatus::NotFound, None, None);
        }
    }
}
