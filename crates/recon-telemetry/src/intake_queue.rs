// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process hand-off between the HTTP ingress and the telemetry worker.
//!
//! ```text
//!    ┌──────────────┐
//!    │ IntakeHandle │ (one clone per request task)
//!    └──────┬───────┘
//!           │ unbounded mpsc, FIFO
//!           v
//!    ┌──────────────┐
//!    │IntakeReceiver│ (owned by the single worker)
//!    └──────────────┘
//! ```
//!
//! Enqueueing never waits for the consumer. The receiver is not `Clone`, so
//! there is exactly one consumer per queue.

use tokio::sync::mpsc;

use crate::error::IntakeError;
use crate::message::TelemetryMessage;

/// Creates a new queue, returning the producer handle and the consumer side.
pub fn channel() -> (IntakeHandle, IntakeReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IntakeHandle { tx }, IntakeReceiver { rx })
}

/// Producer side of the queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct IntakeHandle {
    tx: mpsc::UnboundedSender<TelemetryMessage>,
}

impl IntakeHandle {
    /// Appends a message. Fails only once the receiver has been closed.
    pub fn enqueue(&self, message: TelemetryMessage) -> Result<(), IntakeError> {
        self.tx.send(message).map_err(|_| IntakeError::Closed)
    }

    /// Appends every message in order, stopping at the first failure.
    pub fn enqueue_all(
        &self,
        messages: impl IntoIterator<Item = TelemetryMessage>,
    ) -> Result<usize, IntakeError> {
        let mut count = 0;
        for message in messages {
            self.enqueue(message)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the queue.
#[derive(Debug)]
pub struct IntakeReceiver {
    rx: mpsc::UnboundedReceiver<TelemetryMessage>,
}

impl IntakeReceiver {
    /// Waits for the next message. Returns None once the queue is closed (or
    /// every handle dropped) and everything buffered has been handed out.
    pub async fn dequeue(&mut self) -> Option<TelemetryMessage> {
        self.rx.recv().await
    }

    /// Stops accepting new messages. Already buffered messages can still be
    /// dequeued.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
