//! voxturn - Interruptible turn pipeline for spoken-dialogue agents
//!
//! Streams chat completions sentence by sentence into speech synthesis and
//! abandons in-flight work the moment the user starts talking again.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod backend;
pub mod chunker;
#[cfg(feature = "cli")]
pub mod cli;
pub mod completion;
pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod frame;
pub mod horizon;
pub mod interrupt;
pub mod latency;
pub mod memory;
pub mod outbound;
pub mod pipeline;
pub mod queue;
pub mod segmenter;
pub mod simulate;
pub mod sink;
pub mod synthesis;

// Capabilities
pub use backend::{
    ChatRequest, CompletionBackend, CompletionStream, ScriptedCompletion, ScriptedSynthesis,
    SpeechRequest, SpeechStream, SynthesisBackend,
};

// Pipeline
pub use pipeline::TurnPipeline;
pub use completion::{CompletionWorker, TurnInput};
pub use synthesis::SynthesisWorker;
pub use outbound::{OutboundSender, outbound_channel};

// Events and data
pub use events::{ControlCommand, InboundEvent, OutboundEvent};
pub use frame::{AudioFormat, AudioFrame, DataFormat};
pub use horizon::{AbandonReason, Outcome, StalenessHorizon, Timestamp, TurnMessage, TurnToken};
pub use memory::{MemoryEntry, MemoryWindow, Role};

// Building blocks
pub use sink::{CollectorSink, EventSink, TextPrinter, WavFrameSink};
pub use chunker::FrameChunker;
pub use interrupt::{InterruptDetector, InterruptPolicy};
pub use queue::{OverflowPolicy, SentenceItem, SentenceSender};
pub use segmenter::{Segment, SentenceAccumulator, segment};

// Error handling
pub use error::{Result, TurnError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
