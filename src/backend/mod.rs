//! Capability traits for the external completion and synthesis services.
//!
//! Vendor clients implement these; the workers only ever see the traits.
//! Both calls return a stream the caller may drop at any point, which is
//! how an abandoned request is cancelled.

pub mod scripted;

use crate::config::{CompletionConfig, SynthesisConfig};
use crate::error::Result;
use crate::memory::MemoryEntry;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Text deltas of one streamed completion.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Raw PCM bytes of one streamed synthesis.
pub type SpeechStream = Pin<Box<dyn AsyncRead + Send>>;

/// One chat completion request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatRequest {
    pub model: String,
    /// System prompt sent ahead of `messages`. Empty means none.
    pub prompt: String,
    /// Conversation memory, oldest first, ending with the user turn.
    pub messages: Vec<MemoryEntry>,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Request template carrying the configured model, prompt and sampling.
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            messages: Vec::new(),
            temperature: config.temperature,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            max_tokens: config.max_tokens,
        }
    }

    /// Same settings with a different conversation.
    pub fn with_messages(&self, messages: Vec<MemoryEntry>) -> Self {
        Self {
            messages,
            ..self.clone()
        }
    }

    /// Full message list as sent on the wire: the prompt as a system entry,
    /// then the conversation.
    pub fn conversation(&self) -> Vec<MemoryEntry> {
        let prompt = self.prompt.trim();
        let system = (!prompt.is_empty()).then(|| MemoryEntry::system(prompt));
        system.into_iter().chain(self.messages.iter().cloned()).collect()
    }
}

/// One sentence to voice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub model: String,
}

impl SpeechRequest {
    /// Request template carrying the configured voice and model.
    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self {
            text: String::new(),
            voice: config.voice.clone(),
            model: config.model.clone(),
        }
    }

    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }
}

/// Streams a chat completion for a conversation context.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Opens a streaming completion for `request`.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<CompletionStream>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Streams synthesized speech for one sentence.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Opens a PCM stream in the pipeline's configured audio format.
    async fn stream_speech(&self, request: &SpeechRequest) -> Result<SpeechStream>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: CompletionBackend + ?Sized> CompletionBackend for Arc<T> {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<CompletionStream> {
        (**self).stream_chat(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T: SynthesisBackend + ?Sized> SynthesisBackend for Arc<T> {
    async fn stream_speech(&self, request: &SpeechRequest) -> Result<SpeechStream> {
        (**self).stream_speech(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

pub use scripted::{ScriptedCompletion, ScriptedSynthesis};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;

    #[test]
    fn test_request_carries_configured_sampling() {
        let mut config = CompletionConfig::default();
        config.model = "gpt-test".to_string();
        config.temperature = 0.2;
        config.max_tokens = 64;

        let request =
            ChatRequest::from_config(&config).with_messages(vec![MemoryEntry::user("hi")]);
        assert_eq!(request.model, "gpt-test");
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.max_tokens, 64);
        assert_eq!(request.top_p, config.top_p);
        assert_eq!(request.messages, vec![MemoryEntry::user("hi")]);
    }

    #[test]
    fn test_conversation_puts_prompt_first() {
        let request = ChatRequest {
            prompt: "Be brief.".to_string(),
            messages: vec![MemoryEntry::user("hi"), MemoryEntry::assistant("hello")],
            ..ChatRequest::default()
        };
        let conversation = request.conversation();
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation[0].role, Role::System);
        assert_eq!(conversation[0].content, "Be brief.");
        assert_eq!(conversation[2], MemoryEntry::assistant("hello"));
    }

    #[test]
    fn test_blank_prompt_is_omitted() {
        let request = ChatRequest {
            prompt: "  ".to_string(),
            messages: vec![MemoryEntry::user("hi")],
            ..ChatRequest::default()
        };
        assert_eq!(request.conversation(), vec![MemoryEntry::user("hi")]);
    }

    #[test]
    fn test_speech_request_keeps_voice() {
        let mut config = SynthesisConfig::default();
        config.voice = "narrator".to_string();
        let request = SpeechRequest::from_config(&config).with_text("Hello.");
        assert_eq!(request.text, "Hello.");
        assert_eq!(request.voice, "narrator");
        assert_eq!(request.model, config.model);
    }
}
