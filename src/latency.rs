//! Latency measurement and reporting for the turn pipeline.
//!
//! Each worker keeps its own tracker and hands it back when it stops, so
//! recording never takes a lock shared between stages.

use crate::horizon::{Outcome, Timestamp};
use std::time::Duration;

/// Timing for one completion turn.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub turn: Timestamp,
    pub sentences: usize,
    pub chars: usize,
    /// From turn start to the first complete sentence.
    pub first_sentence_latency: Option<Duration>,
    pub total_latency: Duration,
    pub outcome: Outcome,
}

impl CompletionReport {
    pub fn new(turn: Timestamp) -> Self {
        Self {
            turn,
            sentences: 0,
            chars: 0,
            first_sentence_latency: None,
            total_latency: Duration::ZERO,
            outcome: Outcome::Completed,
        }
    }
}

/// Timing for one synthesized sentence.
#[derive(Debug, Clone)]
pub struct SynthesisReport {
    pub turn: Timestamp,
    pub text_chars: usize,
    pub bytes_read: usize,
    pub frames_emitted: usize,
    /// From dequeue to the first emitted frame.
    pub first_frame_latency: Option<Duration>,
    pub total_latency: Duration,
    pub outcome: Outcome,
}

impl SynthesisReport {
    pub fn new(turn: Timestamp, text: &str) -> Self {
        Self {
            turn,
            text_chars: text.chars().count(),
            bytes_read: 0,
            frames_emitted: 0,
            first_frame_latency: None,
            total_latency: Duration::ZERO,
            outcome: Outcome::Completed,
        }
    }
}

/// Aggregated latency statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyStats {
    pub turns: usize,
    pub turns_abandoned: usize,
    pub sentences_emitted: usize,
    pub first_sentence_avg: Option<Duration>,
    pub first_sentence_min: Option<Duration>,
    pub first_sentence_max: Option<Duration>,
    pub syntheses: usize,
    pub syntheses_abandoned: usize,
    pub bytes_read: usize,
    pub frames_emitted: usize,
    pub first_frame_avg: Option<Duration>,
    pub first_frame_min: Option<Duration>,
    pub first_frame_max: Option<Duration>,
}

/// Collects completion and synthesis reports.
#[derive(Debug, Clone, Default)]
pub struct LatencyTracker {
    completions: Vec<CompletionReport>,
    syntheses: Vec<SynthesisReport>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completion(&mut self, report: CompletionReport) {
        self.completions.push(report);
    }

    pub fn record_synthesis(&mut self, report: SynthesisReport) {
        self.syntheses.push(report);
    }

    pub fn completions(&self) -> &[CompletionReport] {
        &self.completions
    }

    pub fn syntheses(&self) -> &[SynthesisReport] {
        &self.syntheses
    }

    /// Folds another tracker's reports into this one.
    pub fn merge(&mut self, other: LatencyTracker) {
        self.completions.extend(other.completions);
        self.syntheses.extend(other.syntheses);
    }

    /// Computes aggregated statistics; `None` when nothing was recorded.
    pub fn stats(&self) -> Option<LatencyStats> {
        if self.completions.is_empty() && self.syntheses.is_empty() {
            return None;
        }

        let first_sentences: Vec<Duration> = self
            .completions
            .iter()
            .filter_map(|r| r.first_sentence_latency)
            .collect();
        let first_frames: Vec<Duration> = self
            .syntheses
            .iter()
            .filter_map(|r| r.first_frame_latency)
            .collect();

        Some(LatencyStats {
            turns: self.completions.len(),
            turns_abandoned: self
                .completions
                .iter()
                .filter(|r| !r.outcome.is_completed())
                .count(),
            sentences_emitted: self.completions.iter().map(|r| r.sentences).sum(),
            first_sentence_avg: avg_duration(&first_sentences),
            first_sentence_min: first_sentences.iter().min().copied(),
            first_sentence_max: first_sentences.iter().max().copied(),
            syntheses: self.syntheses.len(),
            syntheses_abandoned: self
                .syntheses
                .iter()
                .filter(|r| !r.outcome.is_completed())
                .count(),
            bytes_read: self.syntheses.iter().map(|r| r.bytes_read).sum(),
            frames_emitted: self.syntheses.iter().map(|r| r.frames_emitted).sum(),
            first_frame_avg: avg_duration(&first_frames),
            first_frame_min: first_frames.iter().min().copied(),
            first_frame_max: first_frames.iter().max().copied(),
        })
    }

    /// Logs a session summary at info level.
    pub fn log_summary(&self) {
        let Some(stats) = self.stats() else {
            return;
        };
        tracing::info!(
            turns = stats.turns,
            turns_abandoned = stats.turns_abandoned,
            sentences = stats.sentences_emitted,
            first_sentence_avg = %format_optional(stats.first_sentence_avg),
            syntheses = stats.syntheses,
            syntheses_abandoned = stats.syntheses_abandoned,
            bytes_read = stats.bytes_read,
            frames = stats.frames_emitted,
            first_frame_avg = %format_optional(stats.first_frame_avg),
            "session summary"
        );
    }
}

/// Formats a duration as a human-friendly string.
/// Under 1s: "450ms", at or above 1s: "1.5s".
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

fn format_optional(d: Option<Duration>) -> String {
    d.map(format_duration).unwrap_or_else(|| "-".to_string())
}

fn avg_duration(durations: &[Duration]) -> Option<Duration> {
    if durations.is_empty() {
        return None;
    }
    let sum: Duration = durations.iter().sum();
    Some(sum / durations.len() as u32)
}
