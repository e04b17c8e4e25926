//! Ordered outbound channel shared by both workers.
//!
//! Every send goes through one lock. Turn-scoped events are checked against
//! their token while the lock is held, and a flush marker is only sent after
//! the horizon has moved, so nothing from before a flush can follow the
//! marker to the sink.

use crate::error::{Result, TurnError};
use crate::events::OutboundEvent;
use crate::horizon::TurnToken;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Producer handle for outbound events. Clones share the ordering lock.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundEvent>,
    gate: Arc<Mutex<()>>,
}

/// Creates the outbound channel with room for `capacity` events (at least one).
pub fn outbound_channel(capacity: usize) -> (OutboundSender, mpsc::Receiver<OutboundEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        OutboundSender {
            tx,
            gate: Arc::new(Mutex::new(())),
        },
        rx,
    )
}

impl OutboundSender {
    /// Sends `event` unconditionally.
    pub async fn send(&self, event: OutboundEvent) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.tx.send(event).await.map_err(|_| closed())
    }

    /// Sends `event` only while the turn behind `token` is still current.
    ///
    /// Returns `false` without sending once the token is cancelled.
    pub async fn send_current(&self, token: &TurnToken, event: OutboundEvent) -> Result<bool> {
        let _gate = self.gate.lock().await;
        if token.is_cancelled() {
            return Ok(false);
        }
        self.tx.send(event).await.map_err(|_| closed())?;
        Ok(true)
    }

    /// Sends the flush marker. Call only after the horizon has been raised.
    pub async fn flush(&self) -> Result<()> {
        self.send(OutboundEvent::flush()).await
    }
}

fn closed() -> TurnError {
    TurnError::ChannelClosed {
        channel: "outbound events".to_string(),
    }
}
