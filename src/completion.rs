//! Completion streaming worker.
//!
//! One long-lived consumer per pipeline. For every finalized user utterance
//! it streams a reply from the [`CompletionBackend`], splits it into
//! sentences as deltas arrive, and hands each sentence to synthesis. The
//! turn's token is checked after every delta and raced against every
//! backend await, so a flush stops the turn within one delta.

use crate::backend::{ChatRequest, CompletionBackend, CompletionStream};
use crate::defaults;
use crate::error::Result;
use crate::events::OutboundEvent;
use crate::horizon::{AbandonReason, Outcome, StalenessHorizon, TurnMessage, TurnToken};
use crate::latency::{CompletionReport, LatencyTracker, format_duration};
use crate::memory::{self, MemoryEntry, MemoryWindow};
use crate::outbound::OutboundSender;
use crate::queue::SentenceSender;
use crate::segmenter::SentenceAccumulator;
use futures_util::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Items fed to the completion worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    /// A finalized user utterance.
    Utterance(TurnMessage),
    /// Emit the flush marker and relay it to synthesis once the current
    /// turn is done.
    Flush,
}

/// Drives completions and owns the conversation memory.
pub struct CompletionWorker<B: CompletionBackend> {
    backend: B,
    horizon: StalenessHorizon,
    request: ChatRequest,
    request_timeout: Duration,
    memory: MemoryWindow,
    memory_tx: mpsc::Sender<MemoryEntry>,
    memory_rx: mpsc::Receiver<MemoryEntry>,
    accumulator: SentenceAccumulator,
    sentences: SentenceSender,
    outbound: OutboundSender,
    tracker: LatencyTracker,
}

impl<B: CompletionBackend> CompletionWorker<B> {
    pub fn new(
        backend: B,
        horizon: StalenessHorizon,
        max_memory_length: usize,
        sentences: SentenceSender,
        outbound: OutboundSender,
    ) -> Self {
        let (memory_tx, memory_rx) = memory::update_channel(max_memory_length);
        Self {
            backend,
            horizon,
            request: ChatRequest::default(),
            request_timeout: Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS),
            memory: MemoryWindow::new(max_memory_length),
            memory_tx,
            memory_rx,
            accumulator: SentenceAccumulator::new(),
            sentences,
            outbound,
            tracker: LatencyTracker::new(),
        }
    }

    /// Model, prompt and sampling sent with every turn.
    pub fn with_request(mut self, request: ChatRequest) -> Self {
        self.request = request;
        self
    }

    /// Upper bound on opening a completion stream.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Memory as of the last drained update.
    pub fn memory(&self) -> &MemoryWindow {
        &self.memory
    }

    /// Runs the worker until the input closes or downstream goes away.
    ///
    /// Returns the latency reports collected while running.
    pub async fn run(mut self, mut input: mpsc::Receiver<TurnInput>) -> LatencyTracker {
        while let Some(item) = input.recv().await {
            let step = match item {
                TurnInput::Utterance(msg) => self.process_turn(msg).await.map(|_| ()),
                TurnInput::Flush => self.relay_flush().await,
            };
            if let Err(e) = step {
                tracing::debug!(error = %e, "completion worker stopping");
                break;
            }
        }
        self.tracker
    }

    /// The marker goes out before any text of a later turn.
    async fn relay_flush(&self) -> Result<()> {
        tracing::debug!("relaying flush");
        self.outbound.flush().await?;
        self.sentences.flush().await
    }

    /// Processes one user utterance end to end.
    ///
    /// Only a closed downstream channel is an error; backend failures and
    /// staleness end the turn and are reported in the returned report.
    pub async fn process_turn(&mut self, msg: TurnMessage) -> Result<CompletionReport> {
        let started = Instant::now();
        let token = self.horizon.token(msg.received_at);
        let mut report = CompletionReport::new(msg.received_at);

        let drained = self.memory.drain_updates(&mut self.memory_rx);
        self.memory.push(MemoryEntry::user(msg.text.as_str()));

        if token.is_cancelled() {
            tracing::debug!(
                turn = %msg.received_at,
                text = %msg.text,
                "utterance stale before completion started, kept in memory only"
            );
            report.outcome = Outcome::Abandoned(AbandonReason::Stale);
            self.tracker.record_completion(report.clone());
            return Ok(report);
        }

        let request = self.request.with_messages(self.memory.snapshot());
        self.accumulator.reset();
        tracing::info!(
            turn = %msg.received_at,
            backend = self.backend.name(),
            memory = request.messages.len(),
            drained,
            text = %msg.text,
            "completion turn started"
        );

        let mut full_content = String::new();
        let outcome = match self.open(&token, &request).await {
            Ok(stream) => {
                self.stream_reply(stream, &token, &msg, started, &mut report, &mut full_content)
                    .await?
            }
            Err(outcome) => outcome,
        };

        // The reply so far goes to memory however the turn ended.
        if !full_content.is_empty() {
            report.chars = full_content.chars().count();
            if let Err(e) = self.memory_tx.try_send(MemoryEntry::assistant(full_content)) {
                tracing::warn!(error = %e, "memory update dropped");
            }
        }

        // Only a reply that ran to completion voices its unterminated tail.
        let leftover = self.accumulator.take_pending();
        self.outbound
            .send(OutboundEvent::PartialText {
                text: leftover.clone(),
                end_of_segment: true,
            })
            .await?;
        if outcome.is_completed() && !leftover.trim().is_empty() {
            self.sentences
                .enqueue(TurnMessage::at(leftover, msg.received_at))
                .await?;
        }

        report.total_latency = started.elapsed();
        report.outcome = outcome;
        tracing::info!(
            turn = %msg.received_at,
            sentences = report.sentences,
            chars = report.chars,
            outcome = ?report.outcome,
            elapsed = %format_duration(report.total_latency),
            "completion turn finished"
        );
        self.tracker.record_completion(report.clone());
        Ok(report)
    }

    /// Opens the backend stream, giving up as soon as the turn goes stale
    /// or the request timeout passes.
    async fn open(
        &self,
        token: &TurnToken,
        request: &ChatRequest,
    ) -> std::result::Result<CompletionStream, Outcome> {
        let open = tokio::time::timeout(self.request_timeout, self.backend.stream_chat(request));
        let opened = tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(
                    turn = %token.issued_at(),
                    "turn went stale while opening completion"
                );
                return Err(Outcome::Abandoned(AbandonReason::Stale));
            }
            opened = open => opened,
        };
        match opened {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => {
                tracing::error!(turn = %token.issued_at(), error = %e, "completion request failed");
                Err(Outcome::Abandoned(AbandonReason::BackendError))
            }
            Err(_) => {
                tracing::error!(
                    turn = %token.issued_at(),
                    timeout = %format_duration(self.request_timeout),
                    "completion request timed out"
                );
                Err(Outcome::Abandoned(AbandonReason::BackendError))
            }
        }
    }

    async fn stream_reply(
        &mut self,
        mut stream: CompletionStream,
        token: &TurnToken,
        msg: &TurnMessage,
        started: Instant,
        report: &mut CompletionReport,
        full_content: &mut String,
    ) -> Result<Outcome> {
        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => None,
                next = stream.next() => Some(next),
            };
            let delta = match next {
                None => {
                    tracing::info!(turn = %msg.received_at, "completion interrupted");
                    return Ok(Outcome::Abandoned(AbandonReason::Stale));
                }
                Some(None) => return Ok(Outcome::Completed),
                Some(Some(Err(e))) => {
                    tracing::warn!(turn = %msg.received_at, error = %e, "completion stream failed");
                    return Ok(Outcome::Abandoned(AbandonReason::Truncated));
                }
                Some(Some(Ok(delta))) => delta,
            };

            if token.is_cancelled() {
                tracing::info!(turn = %msg.received_at, "completion interrupted");
                return Ok(Outcome::Abandoned(AbandonReason::Stale));
            }

            full_content.push_str(&delta);
            for sentence in self.accumulator.push(&delta) {
                if report.first_sentence_latency.is_none() {
                    let latency = started.elapsed();
                    report.first_sentence_latency = Some(latency);
                    tracing::info!(
                        turn = %msg.received_at,
                        latency = %format_duration(latency),
                        "first sentence"
                    );
                }
                tracing::debug!(turn = %msg.received_at, sentence = %sentence, "sentence");
                report.sentences += 1;
                self.emit_sentence(sentence, msg).await?;
            }
        }
    }

    async fn emit_sentence(&self, sentence: String, msg: &TurnMessage) -> Result<()> {
        self.outbound
            .send(OutboundEvent::PartialText {
                text: sentence.clone(),
                end_of_segment: false,
            })
            .await?;
        if !sentence.trim().is_empty() {
            self.sentences
                .enqueue(TurnMessage::at(sentence, msg.received_at))
                .await?;
        }
        Ok(())
    }
}
