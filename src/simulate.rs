//! Offline conversation driver over the scripted backends.
//!
//! Each input line is one inbound event: plain text is a final
//! transcription, `~text` is a partial one, `!flush` is a flush command and
//! a line starting with `{` is passed through as JSON. Replies come from the
//! echoing completion backend and are voiced as tones.

use crate::backend::{ScriptedCompletion, ScriptedSynthesis};
use crate::config::Config;
use crate::events::{InboundEvent, OutboundEvent};
use crate::interrupt::InterruptPolicy;
use crate::latency::LatencyTracker;
use crate::pipeline::TurnPipeline;
use crate::sink::EventSink;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

/// Pacing and policy for one simulated conversation.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Delay before each completion delta and each synthesis read.
    pub delay: Duration,
    /// Pause after each input line.
    pub gap: Duration,
    /// Overrides the configured interrupt policy.
    pub interrupt: Option<InterruptPolicy>,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(20),
            gap: Duration::from_secs(1),
            interrupt: None,
        }
    }
}

/// What a simulated conversation produced.
#[derive(Debug)]
pub struct SimulateSummary {
    pub lines: usize,
    pub text_events: usize,
    pub audio_frames: usize,
    pub flushes: usize,
    pub dropped_events: u64,
    pub latency: LatencyTracker,
}

/// Runs a conversation from `input` and feeds every outbound event to `sinks`.
pub async fn run_simulate<R>(
    mut config: Config,
    options: SimulateOptions,
    input: R,
    sinks: Vec<Box<dyn EventSink>>,
) -> anyhow::Result<SimulateSummary>
where
    R: AsyncBufRead + Unpin,
{
    // Scripted backends never call out, so placeholder credentials suffice.
    for key in [&mut config.completion.api_key, &mut config.synthesis.api_key] {
        if key.trim().is_empty() {
            *key = "scripted".to_string();
        }
    }
    if let Some(policy) = options.interrupt {
        config.pipeline.interrupt = policy;
    }

    let format = config.audio.format();
    let completion = ScriptedCompletion::echo().with_delta_delay(options.delay);
    let synthesis = ScriptedSynthesis::new(format)
        .with_read_size(format.frame_size() * 4)
        .with_read_interval(options.delay);

    let (pipeline, outbound) = TurnPipeline::start(&config, completion, synthesis).await?;
    let drain_task = tokio::spawn(drain(outbound, sinks));

    let mut lines = input.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        count += 1;
        if line.starts_with('{') {
            pipeline.handle_json(line).await?;
        } else {
            pipeline.handle(parse_line(line)).await?;
        }
        if !options.gap.is_zero() {
            tokio::time::sleep(options.gap).await;
        }
    }

    let dropped_events = pipeline.dropped_events();
    let latency = pipeline.shutdown().await?;
    let counts = drain_task.await??;

    Ok(SimulateSummary {
        lines: count,
        text_events: counts.text,
        audio_frames: counts.audio,
        flushes: counts.flushes,
        dropped_events,
        latency,
    })
}

/// Maps one input line to an inbound event.
pub fn parse_line(line: &str) -> InboundEvent {
    if line == "!flush" {
        InboundEvent::flush()
    } else if let Some(partial) = line.strip_prefix('~') {
        InboundEvent::partial_text(partial.trim_start())
    } else {
        InboundEvent::final_text(line)
    }
}

#[derive(Debug, Default)]
struct Counts {
    text: usize,
    audio: usize,
    flushes: usize,
}

async fn drain(
    mut outbound: mpsc::Receiver<OutboundEvent>,
    mut sinks: Vec<Box<dyn EventSink>>,
) -> crate::error::Result<Counts> {
    let mut counts = Counts::default();
    while let Some(event) = outbound.recv().await {
        match &event {
            OutboundEvent::PartialText { .. } => counts.text += 1,
            OutboundEvent::AudioFrame(_) => counts.audio += 1,
            OutboundEvent::Command { .. } => counts.flushes += 1,
        }
        for sink in sinks.iter_mut() {
            sink.handle(&event)?;
        }
    }
    for sink in sinks.iter_mut() {
        sink.finish()?;
        tracing::debug!(sink = sink.name(), "sink finished");
    }
    Ok(counts)
}
