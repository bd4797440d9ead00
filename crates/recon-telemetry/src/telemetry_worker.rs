// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bounded_store::BoundedStore;
use crate::config::Config;
use crate::error::StoreError;
use crate::intake_queue::IntakeReceiver;
use crate::message::TelemetryMessage;

pub const MAX_RETRY_BACKOFF_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Dequeuing,
    Persisting,
    Stopped,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    /// Messages written to the store.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages dropped after a store failure.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_entries: usize,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        WorkerConfig {
            max_entries: config.telemetry_max_entries,
            max_retries: config.store_max_retries,
            retry_backoff_base_ms: config.store_retry_backoff_base_ms,
        }
    }
}

/// The single consumer of the intake queue. Drains it into the bounded store
/// until shutdown.
pub struct TelemetryWorker {
    receiver: IntakeReceiver,
    store: Arc<dyn BoundedStore>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
    state_tx: watch::Sender<WorkerState>,
}

impl TelemetryWorker {
    pub fn new(
        receiver: IntakeReceiver,
        store: Arc<dyn BoundedStore>,
        config: WorkerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Running);
        TelemetryWorker {
            receiver,
            store,
            config,
            stats: Arc::new(WorkerStats::default()),
            state_tx,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    /// Runs until `cancel` fires, or every intake handle is dropped. On
    /// cancellation the queue is closed and whatever is still buffered gets
    /// persisted before returning.
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("Telemetry worker started");
        loop {
            self.set_state(WorkerState::Dequeuing);
            // cancellation is checked first so a busy queue cannot starve it
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.receiver.close();
                    debug!("Telemetry worker received shutdown, draining {} buffered messages", self.receiver.len());
                    while let Some(message) = self.receiver.dequeue().await {
                        self.set_state(WorkerState::Persisting);
                        self.persist(message, &cancel).await;
                    }
                    break;
                }
                message = self.receiver.dequeue() => message,
            };
            match next {
                Some(message) => {
                    self.set_state(WorkerState::Persisting);
                    self.persist(message, &cancel).await;
                    self.set_state(WorkerState::Running);
                }
                None => break,
            }
        }

        info!(
            "Telemetry worker stopped: {} messages persisted, {} dropped",
            self.stats.processed(),
            self.stats.failed()
        );
        self.set_state(WorkerState::Stopped);
    }

    /// Writes one message. Errors are logged and the message is dropped.
    async fn persist(&self, message: TelemetryMessage, cancel: &CancellationToken) {
        let entry = message.serialize();
        debug!("Processing telemetry: {entry}");
        match self.append_with_retry(entry, cancel).await {
            Ok(()) => {
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!("Error processing telemetry: {e}");
            }
        }
    }

    /// Once `cancel` fires the remaining attempts run without waiting.
    async fn append_with_retry(
        &self,
        entry: String,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self
                .store
                .append_and_trim(entry.clone(), self.config.max_entries)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempts > self.config.max_retries => return Err(e),
                Err(e) => {
                    error!("Store append failed (attempt {attempts}): {e}");
                }
            }
            let backoff = retry_backoff(self.config.retry_backoff_base_ms, attempts);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state_tx.send_replace(state);
    }
}

/// Exponential backoff after the given failed attempt, capped at
/// `MAX_RETRY_BACKOFF_MS`.
fn retry_backoff(base_ms: u64, attempts: u32) -> Duration {
    let factor = 2_u64
        .checked_pow(attempts.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_RETRY_BACKOFF_MS))
}
