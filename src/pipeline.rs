//! Turn pipeline for one conversation channel.
//!
//! Wires the interrupt detector, the completion worker and the synthesis
//! worker together around one shared staleness horizon:
//!
//! ```text
//! inbound ─► detector ─(flush)─► horizon
//!    │
//!    └─► turn queue ─► CompletionWorker ─► sentence queue ─► SynthesisWorker
//!                            │                                     │
//!                            └─ text, flush ─► outbound ◄─ audio ──┘
//! ```
//!
//! The completion worker sends the flush marker once the interrupted turn
//! is finalised, so the marker precedes every event of the next turn.
//! Audio passes the same ordered sender and is dropped there once stale.
//!
//! Every instance owns its own horizon, queues and memory; nothing is
//! shared between pipelines.

use crate::backend::{ChatRequest, CompletionBackend, SpeechRequest, SynthesisBackend};
use crate::completion::{CompletionWorker, TurnInput};
use crate::config::Config;
use crate::error::{Result, TurnError};
use crate::events::{ControlCommand, InboundEvent, OutboundEvent};
use crate::horizon::{StalenessHorizon, Timestamp, TurnMessage};
use crate::interrupt::InterruptDetector;
use crate::latency::LatencyTracker;
use crate::outbound::outbound_channel;
use crate::queue::{SentenceSender, sentence_queue};
use crate::synthesis::SynthesisWorker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to a running pipeline.
///
/// The outbound receiver returned by [`TurnPipeline::start`] must be drained;
/// the workers wait for room in it.
pub struct TurnPipeline {
    horizon: StalenessHorizon,
    detector: InterruptDetector,
    turns: mpsc::Sender<TurnInput>,
    sentences: SentenceSender,
    completion_task: JoinHandle<LatencyTracker>,
    synthesis_task: JoinHandle<LatencyTracker>,
    dropped_events: AtomicU64,
}

impl TurnPipeline {
    /// Validates `config`, spawns both workers and speaks the greeting if set.
    ///
    /// Configuration errors are returned before anything is spawned.
    pub async fn start<C, S>(
        config: &Config,
        completion: C,
        synthesis: S,
    ) -> Result<(Self, mpsc::Receiver<OutboundEvent>)>
    where
        C: CompletionBackend + 'static,
        S: SynthesisBackend + 'static,
    {
        config.validate()?;
        let settings = &config.pipeline;

        let horizon = StalenessHorizon::new();
        let (outbound_tx, outbound_rx) = outbound_channel(settings.outbound_capacity);
        let (sentence_tx, sentence_rx) =
            sentence_queue(settings.sentence_queue_capacity, settings.queue_overflow);
        let (turn_tx, turn_rx) = mpsc::channel(settings.turn_queue_capacity);

        tracing::info!(
            completion = completion.name(),
            synthesis = synthesis.name(),
            model = %config.completion.model,
            voice = %config.synthesis.voice,
            memory = settings.max_memory_length,
            overflow = ?settings.queue_overflow,
            interrupt = ?settings.interrupt,
            "starting turn pipeline"
        );

        if let Some(greeting) = config.completion.greeting.as_deref().map(str::trim)
            && !greeting.is_empty()
        {
            outbound_tx
                .send(OutboundEvent::PartialText {
                    text: greeting.to_string(),
                    end_of_segment: true,
                })
                .await?;
            sentence_tx.enqueue(TurnMessage::new(greeting)).await?;
        }

        let completion_worker = CompletionWorker::new(
            completion,
            horizon.clone(),
            settings.max_memory_length,
            sentence_tx.clone(),
            outbound_tx.clone(),
        )
        .with_request(ChatRequest::from_config(&config.completion))
        .with_request_timeout(Duration::from_secs(config.completion.request_timeout_secs));
        let synthesis_worker = SynthesisWorker::new(
            synthesis,
            horizon.clone(),
            config.audio.format(),
            settings.read_chunk_size,
            outbound_tx,
        )
        .with_request(SpeechRequest::from_config(&config.synthesis))
        .with_request_timeout(Duration::from_secs(config.synthesis.request_timeout_secs));

        let completion_task = tokio::spawn(completion_worker.run(turn_rx));
        let synthesis_task = tokio::spawn(synthesis_worker.run(sentence_rx));

        Ok((
            Self {
                horizon,
                detector: InterruptDetector::new(settings.interrupt),
                turns: turn_tx,
                sentences: sentence_tx,
                completion_task,
                synthesis_task,
                dropped_events: AtomicU64::new(0),
            },
            outbound_rx,
        ))
    }

    /// Routes one inbound event.
    ///
    /// Waits only for turn queue capacity, never for a turn to finish.
    pub async fn handle(&self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::TranscribedText {
                text,
                is_final,
                stream_id,
                ..
            } => {
                if self.detector.should_flush(&text, is_final) {
                    self.flush().await?;
                }
                if !is_final {
                    tracing::trace!(stream_id, text = %text, "partial transcription");
                    return Ok(());
                }
                if text.trim().is_empty() {
                    tracing::debug!(stream_id, "ignoring empty transcription");
                    return Ok(());
                }
                let msg = TurnMessage::new(text);
                tracing::debug!(stream_id, turn = %msg.received_at, text = %msg.text, "user turn");
                self.turns
                    .send(TurnInput::Utterance(msg))
                    .await
                    .map_err(|_| turn_queue_closed())
            }
            InboundEvent::Command {
                command: ControlCommand::Flush,
            } => self.flush().await.map(|_| ()),
        }
    }

    /// Parses and routes one JSON event. Malformed events are dropped.
    pub async fn handle_json(&self, json: &str) -> Result<()> {
        match InboundEvent::parse(json) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                let total = self.dropped_events.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(error = %e, dropped_total = total, "dropping malformed event");
                Ok(())
            }
        }
    }

    /// Abandons everything received before now.
    ///
    /// The horizon moves immediately. The flush marker reaches the outbound
    /// side once the completion worker has finalised the interrupted turn,
    /// ahead of anything from later turns. Returns the new horizon.
    pub async fn flush(&self) -> Result<Timestamp> {
        let horizon = self.horizon.flush();
        tracing::info!(horizon = %horizon, "interrupt");
        self.turns
            .send(TurnInput::Flush)
            .await
            .map_err(|_| turn_queue_closed())?;
        Ok(horizon)
    }

    pub fn horizon(&self) -> &StalenessHorizon {
        &self.horizon
    }

    /// Inbound events dropped as malformed.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Sentences dropped by a full sentence queue.
    pub fn dropped_sentences(&self) -> u64 {
        self.sentences.dropped()
    }

    /// Closes the inbound side, lets queued work finish and returns the
    /// latency reports of both workers.
    pub async fn shutdown(self) -> Result<LatencyTracker> {
        let Self {
            turns,
            sentences,
            completion_task,
            synthesis_task,
            ..
        } = self;
        drop(turns);
        drop(sentences);

        let mut tracker = completion_task
            .await
            .map_err(|e| TurnError::Other(format!("completion worker failed: {e}")))?;
        let synthesis = synthesis_task
            .await
            .map_err(|e| TurnError::Other(format!("synthesis worker failed: {e}")))?;
        tracker.merge(synthesis);
        tracker.log_summary();
        Ok(tracker)
    }
}

fn turn_queue_closed() -> TurnError {
    TurnError::ChannelClosed {
        channel: "turn queue".to_string(),
    }
}
