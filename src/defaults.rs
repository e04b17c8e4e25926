//! Default configuration constants for voxturn.
//!
//! Shared by the config layer and the pipeline stages so both agree on
//! frame geometry, queue sizes, and sampling parameters.

/// Default output sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per PCM sample (16-bit signed little-endian).
pub const BYTES_PER_SAMPLE: u16 = 2;

/// Mono output.
pub const CHANNEL_COUNT: u16 = 1;

/// Channel layout bitmask reported on every frame (front center).
pub const CHANNEL_LAYOUT: u64 = 1;

/// Duration of one outbound audio frame in milliseconds.
///
/// 10ms at 16kHz mono gives 160 samples per channel, 320 bytes per frame.
pub const FRAME_DURATION_MS: u32 = 10;

/// Maximum number of entries kept in the conversation memory window.
pub const MAX_MEMORY_LENGTH: usize = 10;

/// Capacity of the bounded queue between completion and synthesis.
pub const SENTENCE_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the queue feeding finalized utterances to the completion worker.
pub const TURN_QUEUE_CAPACITY: usize = 64;

/// Capacity of the outbound event channel.
pub const OUTBOUND_CAPACITY: usize = 1024;

/// Maximum bytes requested from a synthesis stream per read.
///
/// Bounds the staleness checkpoint interval on the synthesis side.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Minimum characters for the opt-in early interrupt trigger.
pub const EARLY_TRIGGER_MIN_CHARS: usize = 2;

/// Default request timeout for vendor calls, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default completion model identifier.
pub const COMPLETION_MODEL: &str = "gpt-4o";

/// Default system prompt sent ahead of the memory window.
pub const SYSTEM_PROMPT: &str = "You are a voice assistant who talks in a conversational way \
and can chat with me like my friends. I will speak to you in English or Chinese, and you will \
answer in the corrected and improved version of my text with the language I use. Don't talk \
like a robot, instead I would like you to talk like a real human with emotions. I will use \
your answer for text-to-speech, so don't return me any meaningless characters. I want you to \
be helpful, when I'm asking you for advice, give me precise, practical and useful advice \
instead of being vague. When giving me a list of options, express the options in a narrative \
way instead of bullet points.";

/// Default sampling temperature.
pub const TEMPERATURE: f32 = 0.1;

/// Default nucleus sampling cutoff.
pub const TOP_P: f32 = 1.0;

/// Default frequency penalty.
pub const FREQUENCY_PENALTY: f32 = 0.9;

/// Default presence penalty.
pub const PRESENCE_PENALTY: f32 = 0.9;

/// Default completion token budget per turn.
pub const MAX_TOKENS: u32 = 512;

/// Default synthesis voice identifier.
pub const SYNTHESIS_VOICE: &str = "pNInz6obpgDQGcFmaJgB";

/// Default synthesis model identifier.
pub const SYNTHESIS_MODEL: &str = "eleven_multilingual_v2";

/// Samples per channel in one frame of `duration_ms` at `sample_rate`.
pub fn samples_per_frame(sample_rate: u32, duration_ms: u32) -> u32 {
    (u64::from(sample_rate) * u64::from(duration_ms) / 1000) as u32
}
