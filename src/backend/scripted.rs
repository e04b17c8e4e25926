//! Scripted backends for tests, benches and the `simulate` command.
//!
//! Both doubles record what they were asked for and can be configured to
//! pace, fail, truncate or stall their streams.

use super::{
    ChatRequest, CompletionBackend, CompletionStream, SpeechRequest, SpeechStream, SynthesisBackend,
};
use crate::error::{Result, TurnError};
use crate::frame::AudioFormat;
use crate::memory::{MemoryEntry, Role};
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
enum ReplySource {
    /// Replies used in call order; the last one repeats.
    Script(Vec<Vec<String>>),
    /// Repeats the latest user entry back.
    Echo,
}

/// Completion backend driven by a fixed script or by echoing the user.
#[derive(Debug, Clone)]
pub struct ScriptedCompletion {
    source: ReplySource,
    delta_delay: Duration,
    open_delay: Duration,
    should_fail: bool,
    truncate_after: Option<usize>,
    stall: bool,
    calls: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedCompletion {
    /// Creates an echoing backend.
    pub fn echo() -> Self {
        Self {
            source: ReplySource::Echo,
            delta_delay: Duration::ZERO,
            open_delay: Duration::ZERO,
            should_fail: false,
            truncate_after: None,
            stall: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Adds one scripted reply, given as the deltas it streams.
    pub fn with_reply(mut self, deltas: &[&str]) -> Self {
        let reply: Vec<String> = deltas.iter().map(|d| d.to_string()).collect();
        match &mut self.source {
            ReplySource::Script(replies) => replies.push(reply),
            ReplySource::Echo => self.source = ReplySource::Script(vec![reply]),
        }
        self
    }

    /// Sleeps before yielding each delta.
    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        self.delta_delay = delay;
        self
    }

    /// Sleeps before the stream is returned.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Fails every request before any delta.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Yields at most `deltas` deltas, then a stream error.
    pub fn with_truncation_after(mut self, deltas: usize) -> Self {
        self.truncate_after = Some(deltas);
        self
    }

    /// Never ends the stream after the scripted deltas.
    pub fn with_stall(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Conversation memory received so far, one per request.
    pub fn calls(&self) -> Vec<Vec<MemoryEntry>> {
        lock(&self.calls).iter().map(|r| r.messages.clone()).collect()
    }

    /// Full requests received so far, prompt and sampling included.
    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    fn reply_for(&self, call_index: usize, context: &[MemoryEntry]) -> Vec<String> {
        match &self.source {
            ReplySource::Script(replies) => replies
                .get(call_index)
                .or(replies.last())
                .cloned()
                .unwrap_or_default(),
            ReplySource::Echo => echo_deltas(context),
        }
    }
}

impl Default for ScriptedCompletion {
    fn default() -> Self {
        Self::echo()
    }
}

/// Splits an echo of the latest user entry into word deltas.
fn echo_deltas(context: &[MemoryEntry]) -> Vec<String> {
    let heard = context
        .iter()
        .rev()
        .find(|e| e.role == Role::User)
        .map(|e| e.content.trim())
        .unwrap_or("");
    let reply = format!("You said, {heard}. Anything else?");
    reply.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl CompletionBackend for ScriptedCompletion {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<CompletionStream> {
        let call_index = {
            let mut calls = lock(&self.calls);
            calls.push(request.clone());
            calls.len() - 1
        };
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.should_fail {
            return Err(TurnError::backend("scripted", "scripted completion failure"));
        }

        let mut deltas = self.reply_for(call_index, &request.messages);
        if let Some(limit) = self.truncate_after {
            deltas.truncate(limit);
        }
        let delay = self.delta_delay;
        let body = stream::iter(deltas).then(move |delta| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, TurnError>(delta)
        });

        let tail: CompletionStream = if let Some(limit) = self.truncate_after {
            stream::once(async move {
                Err(TurnError::StreamTruncated {
                    backend: "scripted".to_string(),
                    received: limit,
                    message: "scripted completion truncation".to_string(),
                })
            })
            .boxed()
        } else if self.stall {
            stream::pending().boxed()
        } else {
            stream::empty().boxed()
        };

        Ok(body.chain(tail).boxed())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Debug, Clone)]
enum SpeechAudio {
    /// A sine tone lasting `ms_per_char` per character of text.
    Tone { ms_per_char: u32 },
    Fixed(Vec<u8>),
}

/// Synthesis backend producing tones or fixed PCM with scripted pacing.
#[derive(Debug, Clone)]
pub struct ScriptedSynthesis {
    format: AudioFormat,
    audio: SpeechAudio,
    read_size: usize,
    read_interval: Duration,
    open_delay: Duration,
    should_fail: bool,
    truncate_after: Option<usize>,
    stall: bool,
    requests: Arc<Mutex<Vec<String>>>,
}

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 8000.0;
const TONE_MAX_MS: u32 = 3000;

impl ScriptedSynthesis {
    /// Creates a tone generator for `format`.
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            audio: SpeechAudio::Tone { ms_per_char: 30 },
            read_size: 1024,
            read_interval: Duration::ZERO,
            open_delay: Duration::ZERO,
            should_fail: false,
            truncate_after: None,
            stall: false,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns exactly `bytes` for every sentence.
    pub fn with_fixed_audio(mut self, bytes: Vec<u8>) -> Self {
        self.audio = SpeechAudio::Fixed(bytes);
        self
    }

    /// Tone length per character of input text.
    pub fn with_ms_per_char(mut self, ms: u32) -> Self {
        self.audio = SpeechAudio::Tone { ms_per_char: ms };
        self
    }

    /// Maximum bytes returned by one read.
    pub fn with_read_size(mut self, bytes: usize) -> Self {
        self.read_size = bytes.max(1);
        self
    }

    /// Sleeps before every read, the first included.
    pub fn with_read_interval(mut self, interval: Duration) -> Self {
        self.read_interval = interval;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Fails the stream with an I/O error after `bytes` bytes.
    pub fn with_truncation_after(mut self, bytes: usize) -> Self {
        self.truncate_after = Some(bytes);
        self
    }

    /// Never reports end of stream after the audio is read.
    pub fn with_stall(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Texts requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }

    /// PCM this backend produces for `text`.
    pub fn audio_for(&self, text: &str) -> Vec<u8> {
        match &self.audio {
            SpeechAudio::Fixed(bytes) => bytes.clone(),
            SpeechAudio::Tone { ms_per_char } => {
                let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
                let ms = chars.saturating_mul(*ms_per_char).min(TONE_MAX_MS);
                tone_pcm(&self.format, ms)
            }
        }
    }
}

/// Renders a sine tone of `ms` milliseconds in `format`.
pub fn tone_pcm(format: &AudioFormat, ms: u32) -> Vec<u8> {
    let frames = u64::from(format.sample_rate) * u64::from(ms) / 1000;
    let bytes_per_sample = usize::from(format.bytes_per_sample);
    let mut out = Vec::with_capacity(frames as usize * format.block_align());
    for i in 0..frames {
        let phase = 2.0 * std::f64::consts::PI * TONE_HZ * i as f64 / f64::from(format.sample_rate);
        let value = (phase.sin() * TONE_AMPLITUDE) as i16;
        let wide = (i32::from(value) << 16).to_le_bytes();
        for _ in 0..format.channel_count {
            if bytes_per_sample <= 4 {
                out.extend_from_slice(&wide[4 - bytes_per_sample..]);
            } else {
                out.extend(std::iter::repeat_n(0u8, bytes_per_sample - 4));
                out.extend_from_slice(&wide);
            }
        }
    }
    out
}

#[async_trait]
impl SynthesisBackend for ScriptedSynthesis {
    async fn stream_speech(&self, request: &SpeechRequest) -> Result<SpeechStream> {
        lock(&self.requests).push(request.text.clone());
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.should_fail {
            return Err(TurnError::backend("scripted", "scripted synthesis failure"));
        }
        Ok(Box::pin(ScriptedReader {
            data: self.audio_for(&request.text),
            pos: 0,
            read_size: self.read_size,
            interval: self.read_interval,
            sleep: None,
            delay_pending: true,
            fail_at: self.truncate_after,
            stall: self.stall,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Paced in-memory reader behind [`ScriptedSynthesis`].
struct ScriptedReader {
    data: Vec<u8>,
    pos: usize,
    read_size: usize,
    interval: Duration,
    sleep: Option<Pin<Box<tokio::time::Sleep>>>,
    delay_pending: bool,
    fail_at: Option<usize>,
    stall: bool,
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        let interval = this.interval;
        if this.delay_pending && !interval.is_zero() {
            let sleep = this
                .sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(interval)));
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;
        }
        this.delay_pending = false;

        let end = match this.fail_at {
            Some(limit) if this.pos >= limit => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "scripted synthesis truncation",
                )));
            }
            Some(limit) => limit.min(this.data.len()),
            None => this.data.len(),
        };

        if this.pos >= end {
            if this.stall {
                return Poll::Pending;
            }
            return Poll::Ready(Ok(()));
        }

        let n = this.read_size.min(buf.remaining()).min(end - this.pos);
        buf.put_slice(&this.data[this.pos..this.pos + n]);
        this.pos += n;
        this.delay_pending = true;
        Poll::Ready(Ok(()))
    }
}
