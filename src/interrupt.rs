//! Interrupt detection over recognized user text.
//!
//! A finalized transcription means the user has taken the turn, so any
//! in-flight reply must be abandoned. The early trigger fires as soon as a
//! partial transcription is long enough, trading false interrupts for lower
//! barge-in latency; it is opt-in.

use crate::defaults;
use serde::{Deserialize, Serialize};

/// When a recognized-text event raises a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InterruptPolicy {
    /// Flush only on final transcriptions.
    #[default]
    FinalOnly,
    /// Also flush on partial transcriptions of at least `min_chars` characters.
    EarlyTrigger { min_chars: usize },
}

impl InterruptPolicy {
    pub fn early(min_chars: usize) -> Self {
        InterruptPolicy::EarlyTrigger { min_chars }
    }

    pub fn default_early() -> Self {
        Self::early(defaults::EARLY_TRIGGER_MIN_CHARS)
    }
}

/// Stateless flush decision for one recognized-text event.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterruptDetector {
    policy: InterruptPolicy,
}

impl InterruptDetector {
    pub fn new(policy: InterruptPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> InterruptPolicy {
        self.policy
    }

    /// Returns true when this event must raise a flush.
    pub fn should_flush(&self, text: &str, is_final: bool) -> bool {
        if is_final {
            return true;
        }
        match self.policy {
            InterruptPolicy::FinalOnly => false,
            InterruptPolicy::EarlyTrigger { min_chars } => text.chars().count() >= min_chars,
        }
    }
}
