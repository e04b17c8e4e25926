//! Bounded sentence queue between the completion and synthesis workers.
//!
//! Multi-producer, single-consumer, strict FIFO. What happens when the queue
//! is full is decided by [`OverflowPolicy`]; flush markers always wait for
//! room so a flush is never lost.

use crate::error::{Result, TurnError};
use crate::horizon::TurnMessage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Full-queue behavior for sentences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the synthesis worker to make room.
    #[default]
    Block,
    /// Drop the sentence being enqueued and count it.
    DropNewest,
}

/// Item drained by the synthesis worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentenceItem {
    Sentence(TurnMessage),
    /// Relayed flush; emitted downstream once everything before it is handled.
    Flush,
}

/// Result of [`SentenceSender::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    Dropped,
}

/// Producer handle for the sentence queue. Clones share the drop counter.
#[derive(Debug, Clone)]
pub struct SentenceSender {
    tx: mpsc::Sender<SentenceItem>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

/// Creates a sentence queue of `capacity` items (at least one).
pub fn sentence_queue(
    capacity: usize,
    policy: OverflowPolicy,
) -> (SentenceSender, mpsc::Receiver<SentenceItem>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        SentenceSender {
            tx,
            policy,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl SentenceSender {
    /// Enqueues one sentence according to the overflow policy.
    pub async fn enqueue(&self, msg: TurnMessage) -> Result<Enqueued> {
        match self.policy {
            OverflowPolicy::Block => {
                self.tx
                    .send(SentenceItem::Sentence(msg))
                    .await
                    .map_err(|_| closed())?;
                Ok(Enqueued::Queued)
            }
            OverflowPolicy::DropNewest => match self.tx.try_send(SentenceItem::Sentence(msg)) {
                Ok(()) => Ok(Enqueued::Queued),
                Err(TrySendError::Full(SentenceItem::Sentence(msg))) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        text = %msg.text,
                        dropped_total = total,
                        "sentence queue full, dropping sentence"
                    );
                    Ok(Enqueued::Dropped)
                }
                Err(TrySendError::Full(_)) => Ok(Enqueued::Dropped),
                Err(TrySendError::Closed(_)) => Err(closed()),
            },
        }
    }

    /// Relays a flush marker, waiting for room regardless of policy.
    pub async fn flush(&self) -> Result<()> {
        self.tx
            .send(SentenceItem::Flush)
            .await
            .map_err(|_| closed())
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Sentences dropped by [`OverflowPolicy::DropNewest`] so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

fn closed() -> TurnError {
    TurnError::ChannelClosed {
        channel: "sentence queue".to_string(),
    }
}
