//! Synthesis streaming worker.
//!
//! Drains the sentence queue in order, streams PCM for each sentence from the
//! [`SynthesisBackend`], and cuts it into fixed-size audio frames. Every read
//! and every emitted frame is a checkpoint against the staleness horizon; a
//! stale sentence stops mid-stream and its partial frame is never played.

use crate::backend::{SpeechRequest, SpeechStream, SynthesisBackend};
use crate::chunker::FrameChunker;
use crate::defaults;
use crate::error::{Result, TurnError};
use crate::events::OutboundEvent;
use crate::frame::{AudioFormat, AudioFrame};
use crate::horizon::{AbandonReason, Outcome, StalenessHorizon, TurnMessage, TurnToken};
use crate::latency::{LatencyTracker, SynthesisReport, format_duration};
use crate::outbound::OutboundSender;
use crate::queue::SentenceItem;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Turns queued sentences into audio frames.
pub struct SynthesisWorker<B: SynthesisBackend> {
    backend: B,
    horizon: StalenessHorizon,
    chunker: FrameChunker,
    read_chunk_size: usize,
    request: SpeechRequest,
    request_timeout: Duration,
    outbound: OutboundSender,
    tracker: LatencyTracker,
}

impl<B: SynthesisBackend> SynthesisWorker<B> {
    pub fn new(
        backend: B,
        horizon: StalenessHorizon,
        format: AudioFormat,
        read_chunk_size: usize,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            backend,
            horizon,
            chunker: FrameChunker::new(format),
            read_chunk_size: read_chunk_size.max(1),
            request: SpeechRequest::default(),
            request_timeout: Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS),
            outbound,
            tracker: LatencyTracker::new(),
        }
    }

    /// Voice and model sent with every sentence.
    pub fn with_request(mut self, request: SpeechRequest) -> Self {
        self.request = request;
        self
    }

    /// Upper bound on opening a speech stream.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn format(&self) -> &AudioFormat {
        self.chunker.format()
    }

    /// Runs until the sentence queue closes or the outbound side goes away.
    ///
    /// The completion worker has already sent the flush marker downstream by
    /// the time it reaches this queue; here it only ends the relay.
    pub async fn run(mut self, mut input: mpsc::Receiver<SentenceItem>) -> LatencyTracker {
        while let Some(item) = input.recv().await {
            let step = match item {
                SentenceItem::Sentence(msg) => self.synthesize(msg).await.map(|_| ()),
                SentenceItem::Flush => {
                    self.chunker.discard();
                    tracing::debug!("flush reached synthesis");
                    Ok(())
                }
            };
            if let Err(e) = step {
                tracing::debug!(error = %e, "synthesis worker stopping");
                break;
            }
        }
        self.tracker
    }

    /// Synthesizes one sentence, emitting its frames as they fill.
    ///
    /// Backend failures abandon the sentence and are reported; only a closed
    /// outbound channel is returned as an error.
    pub async fn synthesize(&mut self, msg: TurnMessage) -> Result<SynthesisReport> {
        let started = Instant::now();
        let token = self.horizon.token(msg.received_at);
        let mut report = SynthesisReport::new(msg.received_at, &msg.text);
        self.chunker.discard();

        let outcome = if token.is_cancelled() {
            tracing::debug!(
                turn = %msg.received_at,
                text = %msg.text,
                "sentence stale before synthesis"
            );
            Outcome::Abandoned(AbandonReason::Stale)
        } else {
            match self.open(&token, &msg.text).await {
                Ok(reader) => self.stream_frames(reader, &token, started, &mut report).await?,
                Err(outcome) => outcome,
            }
        };

        if !outcome.is_completed() {
            let lost = self.chunker.discard();
            if lost > 0 {
                tracing::debug!(turn = %msg.received_at, bytes = lost, "discarded partial frame");
            }
        }

        report.total_latency = started.elapsed();
        report.outcome = outcome;
        tracing::info!(
            turn = %msg.received_at,
            text = %msg.text,
            bytes_read = report.bytes_read,
            frames = report.frames_emitted,
            first_frame = %report
                .first_frame_latency
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            elapsed = %format_duration(report.total_latency),
            outcome = ?report.outcome,
            "synthesis finished"
        );
        self.tracker.record_synthesis(report.clone());
        Ok(report)
    }

    async fn open(
        &self,
        token: &TurnToken,
        text: &str,
    ) -> std::result::Result<SpeechStream, Outcome> {
        let request = self.request.with_text(text);
        let open = tokio::time::timeout(self.request_timeout, self.backend.stream_speech(&request));
        let opened = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Outcome::Abandoned(AbandonReason::Stale)),
            opened = open => opened,
        };
        match opened {
            Ok(Ok(reader)) if token.is_cancelled() => {
                drop(reader);
                Err(Outcome::Abandoned(AbandonReason::Stale))
            }
            Ok(Ok(reader)) => Ok(reader),
            Ok(Err(e)) => {
                tracing::error!(
                    turn = %token.issued_at(),
                    backend = self.backend.name(),
                    error = %e,
                    "synthesis request failed"
                );
                Err(Outcome::Abandoned(AbandonReason::BackendError))
            }
            Err(_) => {
                tracing::error!(
                    turn = %token.issued_at(),
                    backend = self.backend.name(),
                    timeout = %format_duration(self.request_timeout),
                    "synthesis request timed out"
                );
                Err(Outcome::Abandoned(AbandonReason::BackendError))
            }
        }
    }

    async fn stream_frames(
        &mut self,
        mut reader: SpeechStream,
        token: &TurnToken,
        started: Instant,
        report: &mut SynthesisReport,
    ) -> Result<Outcome> {
        let mut buf = vec![0u8; self.read_chunk_size];
        loop {
            let read = tokio::select! {
                biased;
                () = token.cancelled() => return Ok(Outcome::Abandoned(AbandonReason::Stale)),
                read = reader.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    if let Some(frame) = self.chunker.flush_remainder()
                        && !self.emit_frame(frame, token, started, report).await?
                    {
                        return Ok(Outcome::Abandoned(AbandonReason::Stale));
                    }
                    return Ok(Outcome::Completed);
                }
                Ok(n) => {
                    if token.is_cancelled() {
                        return Ok(Outcome::Abandoned(AbandonReason::Stale));
                    }
                    report.bytes_read += n;
                    let frames: Vec<AudioFrame> = self.chunker.feed(&buf[..n]).collect();
                    for frame in frames {
                        if !self.emit_frame(frame, token, started, report).await? {
                            return Ok(Outcome::Abandoned(AbandonReason::Stale));
                        }
                    }
                }
                Err(e) => {
                    let err = TurnError::StreamTruncated {
                        backend: self.backend.name().to_string(),
                        received: report.bytes_read,
                        message: e.to_string(),
                    };
                    tracing::warn!(
                        turn = %token.issued_at(),
                        error = %err,
                        "synthesis stream failed"
                    );
                    return Ok(Outcome::Abandoned(AbandonReason::Truncated));
                }
            }
        }
    }

    /// Sends one frame unless the turn went stale; false means it was dropped.
    async fn emit_frame(
        &self,
        frame: AudioFrame,
        token: &TurnToken,
        started: Instant,
        report: &mut SynthesisReport,
    ) -> Result<bool> {
        if !self
            .outbound
            .send_current(token, OutboundEvent::AudioFrame(frame))
            .await?
        {
            return Ok(false);
        }
        if report.first_frame_latency.is_none() {
            report.first_frame_latency = Some(started.elapsed());
        }
        report.frames_emitted += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedSynthesis;
    use crate::horizon::Timestamp;
    use crate::outbound::outbound_channel;

    fn worker(
        backend: ScriptedSynthesis,
        read_chunk_size: usize,
    ) -> (
        SynthesisWorker<ScriptedSynthesis>,
        StalenessHorizon,
        mpsc::Receiver<OutboundEvent>,
    ) {
        let horizon = StalenessHorizon::new();
        let (tx, rx) = outbound_channel(1024);
        let worker = SynthesisWorker::new(
            backend,
            horizon.clone(),
            AudioFormat::default(),
            read_chunk_size,
            tx,
        );
        (worker, horizon, rx)
    }

    fn frames(rx: &mut mpsc::Receiver<OutboundEvent>) -> Vec<AudioFrame> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let OutboundEvent::AudioFrame(frame) = event {
                out.push(frame);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_frames_are_full_except_last() {
        // 320 bytes per 10ms frame at 16kHz mono s16
        let backend = ScriptedSynthesis::new(AudioFormat::default())
            .with_fixed_audio(vec![7; 1000])
            .with_read_size(333);
        let (mut worker, _horizon, mut rx) = worker(backend, 4096);

        let report = worker.synthesize(TurnMessage::new("Hello,")).await.unwrap();
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.bytes_read, 1000);
        assert_eq!(report.frames_emitted, 4);

        let out = frames(&mut rx);
        let sizes: Vec<usize> = out.iter().map(|f| f.payload.len()).collect();
        assert_eq!(sizes, vec![320, 320, 320, 40]);
        assert_eq!(out[0].samples_per_channel, 160);
        assert_eq!(out[3].samples_per_channel, 20);
        assert!(out.iter().all(|f| f.sample_rate == 16000 && f.channel_count == 1));
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_short_frame() {
        let backend =
            ScriptedSynthesis::new(AudioFormat::default()).with_fixed_audio(vec![1; 640]);
        let (mut worker, _horizon, mut rx) = worker(backend, 100);

        worker.synthesize(TurnMessage::new("Hi.")).await.unwrap();
        let sizes: Vec<usize> = frames(&mut rx).iter().map(|f| f.payload.len()).collect();
        assert_eq!(sizes, vec![320, 320]);
    }

    #[tokio::test]
    async fn test_stale_sentence_is_not_requested() {
        let backend = ScriptedSynthesis::new(AudioFormat::default());
        let (mut worker, horizon, mut rx) = worker(backend.clone(), 4096);

        horizon.raise(Timestamp::from_micros(100));
        let report = worker
            .synthesize(TurnMessage::at("old", Timestamp::from_micros(50)))
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::Abandoned(AbandonReason::Stale));
        assert!(backend.requests().is_empty());
        assert!(frames(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_flush_mid_stream_drops_partial_frame() {
        let backend = ScriptedSynthesis::new(AudioFormat::default())
            .with_fixed_audio(vec![3; 320 * 50])
            .with_read_size(500)
            .with_read_interval(Duration::from_millis(10));
        let (mut worker, horizon, mut rx) = worker(backend, 4096);

        let flusher = horizon.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(45)).await;
            flusher.flush();
        });

        let report = worker.synthesize(TurnMessage::new("long sentence")).await.unwrap();
        assert_eq!(report.outcome, Outcome::Abandoned(AbandonReason::Stale));
        assert!(report.bytes_read < 320 * 50);

        let out = frames(&mut rx);
        assert!(!out.is_empty());
        assert!(out.iter().all(|f| f.payload.len() == 320), "no short frame after a flush");
    }

    #[tokio::test]
    async fn test_stalled_stream_released_on_flush() {
        let backend = ScriptedSynthesis::new(AudioFormat::default())
            .with_fixed_audio(vec![0; 100])
            .with_stall();
        let (mut worker, horizon, _rx) = worker(backend, 4096);

        let flusher = horizon.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flusher.flush();
        });

        let report = tokio::time::timeout(
            Duration::from_secs(1),
            worker.synthesize(TurnMessage::new("stuck")),
        )
        .await
        .expect("flush must release a stalled read")
        .unwrap();
        assert_eq!(report.outcome, Outcome::Abandoned(AbandonReason::Stale));
    }

    #[tokio::test]
    async fn test_truncated_stream_discards_remainder() {
        let backend = ScriptedSynthesis::new(AudioFormat::default())
            .with_fixed_audio(vec![0; 1000])
            .with_read_size(400)
            .with_truncation_after(800);
        let (mut worker, _horizon, mut rx) = worker(backend, 4096);

        let report = worker.synthesize(TurnMessage::new("cut")).await.unwrap();
        assert_eq!(report.outcome, Outcome::Abandoned(AbandonReason::Truncated));
        assert_eq!(report.bytes_read, 800);
        let sizes: Vec<usize> = frames(&mut rx).iter().map(|f| f.payload.len()).collect();
        assert_eq!(sizes, vec![320, 320]);
    }

    #[tokio::test]
    async fn test_backend_failure_moves_on() {
        let backend = ScriptedSynthesis::new(AudioFormat::default()).with_failure();
        let (mut worker, _horizon, mut rx) = worker(backend, 4096);

        let report = worker.synthesize(TurnMessage::new("x")).await.unwrap();
        assert_eq!(report.outcome, Outcome::Abandoned(AbandonReason::BackendError));
        assert!(frames(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_run_keeps_order_and_ends_flush_relay() {
        let backend =
            ScriptedSynthesis::new(AudioFormat::default()).with_fixed_audio(vec![0; 320]);
        let (worker, _horizon, mut rx) = worker(backend.clone(), 4096);
        let (tx, input) = mpsc::channel(8);

        let task = tokio::spawn(worker.run(input));
        tx.send(SentenceItem::Sentence(TurnMessage::new("a,"))).await.unwrap();
        tx.send(SentenceItem::Sentence(TurnMessage::new(" b."))).await.unwrap();
        tx.send(SentenceItem::Flush).await.unwrap();
        drop(tx);
        let tracker = task.await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.as_audio().is_some()));
        assert_eq!(backend.requests(), vec!["a,", " b."]);
        assert_eq!(tracker.syntheses().len(), 2);
    }

    #[tokio::test]
    async fn test_slow_open_times_out_as_backend_error() {
        let backend = ScriptedSynthesis::new(AudioFormat::default())
            .with_open_delay(Duration::from_secs(5));
        let (worker, _horizon, mut rx) = worker(backend, 4096);
        let mut worker = worker.with_request_timeout(Duration::from_millis(30));

        let report = tokio::time::timeout(
            Duration::from_secs(1),
            worker.synthesize(TurnMessage::new("slow")),
        )
        .await
        .expect("request timeout bounds the open")
        .unwrap();
        assert_eq!(report.outcome, Outcome::Abandoned(AbandonReason::BackendError));
        assert!(frames(&mut rx).is_empty());
    }

    /// Remembers the voice of every request.
    struct VoiceRecorder {
        inner: ScriptedSynthesis,
        voices: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl SynthesisBackend for VoiceRecorder {
        async fn stream_speech(&self, request: &SpeechRequest) -> Result<SpeechStream> {
            self.voices.lock().unwrap().push(request.voice.clone());
            self.inner.stream_speech(request).await
        }

        fn name(&self) -> &str {
            "voice-recorder"
        }
    }

    #[tokio::test]
    async fn test_request_carries_configured_voice() {
        let backend = VoiceRecorder {
            inner: ScriptedSynthesis::new(AudioFormat::default()).with_fixed_audio(vec![0; 10]),
            voices: std::sync::Mutex::new(Vec::new()),
        };
        let (tx, _rx) = outbound_channel(16);
        let template = SpeechRequest {
            voice: "narrator".to_string(),
            ..SpeechRequest::default()
        };
        let mut worker = SynthesisWorker::new(
            backend,
            StalenessHorizon::new(),
            AudioFormat::default(),
            4096,
            tx,
        )
        .with_request(template);

        worker.synthesize(TurnMessage::new("Hi.")).await.unwrap();
        assert_eq!(*worker.backend.voices.lock().unwrap(), vec!["narrator"]);
        assert_eq!(worker.backend.inner.requests(), vec!["Hi."]);
    }

    #[tokio::test]
    async fn test_frames_after_flush_are_not_sent() {
        let backend = ScriptedSynthesis::new(AudioFormat::default())
            .with_fixed_audio(vec![0; 320 * 4])
            .with_read_size(320 * 4);
        let (mut worker, horizon, mut rx) = worker(backend, 4096);

        let msg = TurnMessage::new("gone");
        horizon.flush();
        let token = horizon.token(msg.received_at);
        let frame = AudioFrame::new(&AudioFormat::default(), vec![0; 320]);
        let mut report = SynthesisReport::new(msg.received_at, &msg.text);
        let sent = worker
            .emit_frame(frame, &token, Instant::now(), &mut report)
            .await
            .unwrap();
        assert!(!sent);
        assert_eq!(report.frames_emitted, 0);

        let report = worker.synthesize(msg).await.unwrap();
        assert_eq!(report.outcome, Outcome::Abandoned(AbandonReason::Stale));
        assert!(frames(&mut rx).is_empty());
    }
}
