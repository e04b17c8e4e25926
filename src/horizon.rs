//! Staleness horizon: cooperative cancellation shared by every stage.
//!
//! A flush raises the horizon to "now". Any unit of work stamped before the
//! horizon is abandoned at the next checkpoint. Stages hold a [`TurnToken`]
//! per item, which carries the item's issue time and can both be polled
//! (`is_cancelled`) and awaited (`cancelled`) so a stalled backend read can
//! be raced against the flush.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::watch;

/// Monotonic microsecond timestamp.
///
/// Values come from one process-wide clock and are strictly increasing
/// across calls to [`Timestamp::now`], so two stamps never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

static EPOCH: OnceLock<Instant> = OnceLock::new();
static LAST_ISSUED: AtomicI64 = AtomicI64::new(i64::MIN);

impl Timestamp {
    /// Lowest possible timestamp. A fresh horizon starts here.
    pub const MIN: Timestamp = Timestamp(i64::MIN);

    /// Current time on the process clock.
    pub fn now() -> Self {
        let epoch = EPOCH.get_or_init(Instant::now);
        let raw = i64::try_from(epoch.elapsed().as_micros()).unwrap_or(i64::MAX);
        let prev = LAST_ISSUED
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(raw.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        Timestamp(raw.max(prev.saturating_add(1)))
    }

    pub const fn from_micros(micros: i64) -> Self {
        Timestamp(micros)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// A unit of work flowing between stages: a user utterance or one sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnMessage {
    pub text: String,
    pub received_at: Timestamp,
}

impl TurnMessage {
    /// Creates a message stamped with the current time.
    pub fn new(text: impl Into<String>) -> Self {
        Self::at(text, Timestamp::now())
    }

    /// Creates a message with an explicit stamp.
    pub fn at(text: impl Into<String>, received_at: Timestamp) -> Self {
        Self {
            text: text.into(),
            received_at,
        }
    }
}

/// How a unit of work left a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Abandoned(AbandonReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// A flush raised the horizon past the item's stamp.
    Stale,
    /// The backend refused or failed to open the stream.
    BackendError,
    /// The backend stream failed after producing partial output.
    Truncated,
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }
}

struct Shared {
    horizon: AtomicI64,
    raised: watch::Sender<()>,
}

/// Channel-scoped cancellation cutoff. Cloning shares the same horizon.
#[derive(Clone)]
pub struct StalenessHorizon {
    shared: Arc<Shared>,
}

impl StalenessHorizon {
    /// Creates a horizon at [`Timestamp::MIN`]; nothing is stale yet.
    pub fn new() -> Self {
        let (raised, _) = watch::channel(());
        Self {
            shared: Arc::new(Shared {
                horizon: AtomicI64::new(Timestamp::MIN.0),
                raised,
            }),
        }
    }

    /// Raises the horizon to `now` if that moves it forward.
    ///
    /// Returns true when the horizon moved. Lower values are ignored, so the
    /// horizon never decreases.
    pub fn raise(&self, now: Timestamp) -> bool {
        let prev = self.shared.horizon.fetch_max(now.0, Ordering::AcqRel);
        if now.0 > prev {
            self.shared.raised.send_replace(());
            true
        } else {
            false
        }
    }

    /// Raises the horizon to the current time and returns that time.
    pub fn flush(&self) -> Timestamp {
        let now = Timestamp::now();
        self.raise(now);
        now
    }

    pub fn load(&self) -> Timestamp {
        Timestamp(self.shared.horizon.load(Ordering::Acquire))
    }

    pub fn is_stale(&self, msg: &TurnMessage) -> bool {
        msg.received_at < self.load()
    }

    /// Issues a cancellation token for work stamped at `issued_at`.
    pub fn token(&self, issued_at: Timestamp) -> TurnToken {
        TurnToken {
            issued_at,
            horizon: self.clone(),
        }
    }
}

impl Default for StalenessHorizon {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StalenessHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StalenessHorizon")
            .field("horizon", &self.load())
            .finish()
    }
}

/// Per-item cancellation token carrying the item's issue time.
#[derive(Clone, Debug)]
pub struct TurnToken {
    issued_at: Timestamp,
    horizon: StalenessHorizon,
}

impl TurnToken {
    pub fn issued_at(&self) -> Timestamp {
        self.issued_at
    }

    /// Checkpoint: true once a flush has moved the horizon past this token.
    pub fn is_cancelled(&self) -> bool {
        self.issued_at < self.horizon.load()
    }

    /// Resolves once the token is cancelled. Never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.horizon.shared.raised.subscribe();
        loop {
            if self.is_cancelled() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
