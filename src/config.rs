use crate::defaults;
use crate::error::{Result, TurnError};
use crate::frame::AudioFormat;
use crate::interrupt::InterruptPolicy;
use crate::queue::OverflowPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub completion: CompletionConfig,
    pub synthesis: SynthesisConfig,
    pub audio: AudioConfig,
    pub pipeline: PipelineConfig,
}

/// Chat completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    /// Empty means not configured.
    pub api_key: String,
    pub model: String,
    /// System prompt sent ahead of the conversation memory.
    pub prompt: String,
    /// Spoken once when the pipeline starts.
    pub greeting: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

/// Speech synthesis service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub api_key: String,
    pub voice: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

/// Outbound audio frame geometry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub bytes_per_sample: u16,
    pub channel_count: u16,
    pub channel_layout: u64,
    pub frame_duration_ms: u32,
}

/// Queue sizes and turn-taking behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_memory_length: usize,
    pub sentence_queue_capacity: usize,
    pub queue_overflow: OverflowPolicy,
    pub turn_queue_capacity: usize,
    pub outbound_capacity: usize,
    pub read_chunk_size: usize,
    pub interrupt: InterruptPolicy,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: defaults::COMPLETION_MODEL.to_string(),
            prompt: defaults::SYSTEM_PROMPT.to_string(),
            greeting: None,
            temperature: defaults::TEMPERATURE,
            top_p: defaults::TOP_P,
            frequency_penalty: defaults::FREQUENCY_PENALTY,
            presence_penalty: defaults::PRESENCE_PENALTY,
            max_tokens: defaults::MAX_TOKENS,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice: defaults::SYNTHESIS_VOICE.to_string(),
            model: defaults::SYNTHESIS_MODEL.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            bytes_per_sample: defaults::BYTES_PER_SAMPLE,
            channel_count: defaults::CHANNEL_COUNT,
            channel_layout: defaults::CHANNEL_LAYOUT,
            frame_duration_ms: defaults::FRAME_DURATION_MS,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_memory_length: defaults::MAX_MEMORY_LENGTH,
            sentence_queue_capacity: defaults::SENTENCE_QUEUE_CAPACITY,
            queue_overflow: OverflowPolicy::default(),
            turn_queue_capacity: defaults::TURN_QUEUE_CAPACITY,
            outbound_capacity: defaults::OUTBOUND_CAPACITY,
            read_chunk_size: defaults::READ_CHUNK_SIZE,
            interrupt: InterruptPolicy::default(),
        }
    }
}

impl AudioConfig {
    /// Frame format derived from the configured frame duration.
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            bytes_per_sample: self.bytes_per_sample,
            channel_count: self.channel_count,
            channel_layout: self.channel_layout,
            samples_per_channel: defaults::samples_per_frame(
                self.sample_rate,
                self.frame_duration_ms,
            ),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents).map_err(|e| TurnError::ConfigParse {
            message: e.to_string(),
        })?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXTURN_API_KEY → completion.api_key
    /// - VOXTURN_MODEL → completion.model
    /// - VOXTURN_SYNTHESIS_API_KEY → synthesis.api_key
    /// - VOXTURN_VOICE → synthesis.voice
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = non_empty_env("VOXTURN_API_KEY") {
            self.completion.api_key = key;
        }
        if let Some(model) = non_empty_env("VOXTURN_MODEL") {
            self.completion.model = model;
        }
        if let Some(key) = non_empty_env("VOXTURN_SYNTHESIS_API_KEY") {
            self.synthesis.api_key = key;
        }
        if let Some(voice) = non_empty_env("VOXTURN_VOICE") {
            self.synthesis.voice = voice;
        }
        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxturn/config.toml on Linux, or a relative
    /// `voxturn/config.toml` when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_default()
            .join("voxturn")
            .join("config.toml")
    }

    /// Rejects configurations the pipeline cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.completion.api_key.trim().is_empty() {
            return Err(TurnError::MissingCredential {
                key: "completion.api_key".to_string(),
            });
        }
        if self.synthesis.api_key.trim().is_empty() {
            return Err(TurnError::MissingCredential {
                key: "synthesis.api_key".to_string(),
            });
        }

        require_positive(
            "completion.request_timeout_secs",
            self.completion.request_timeout_secs,
        )?;
        require_positive("synthesis.request_timeout_secs", self.synthesis.request_timeout_secs)?;
        require_positive("audio.sample_rate", u64::from(self.audio.sample_rate))?;
        require_positive("audio.bytes_per_sample", u64::from(self.audio.bytes_per_sample))?;
        require_positive("audio.channel_count", u64::from(self.audio.channel_count))?;
        require_positive("audio.frame_duration_ms", u64::from(self.audio.frame_duration_ms))?;
        if self.audio.format().samples_per_channel == 0 {
            return Err(invalid(
                "audio.frame_duration_ms",
                "frame holds no samples at this sample rate",
            ));
        }

        let p = &self.pipeline;
        require_positive("pipeline.max_memory_length", p.max_memory_length as u64)?;
        require_positive("pipeline.sentence_queue_capacity", p.sentence_queue_capacity as u64)?;
        require_positive("pipeline.turn_queue_capacity", p.turn_queue_capacity as u64)?;
        require_positive("pipeline.outbound_capacity", p.outbound_capacity as u64)?;
        require_positive("pipeline.read_chunk_size", p.read_chunk_size as u64)?;
        if let InterruptPolicy::EarlyTrigger { min_chars } = p.interrupt {
            require_positive("pipeline.interrupt.min_chars", min_chars as u64)?;
        }

        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(invalid("completion.temperature", "must be between 0 and 2"));
        }
        if !(0.0..=1.0).contains(&self.completion.top_p) {
            return Err(invalid("completion.top_p", "must be between 0 and 1"));
        }
        Ok(())
    }

    /// Copy with credentials masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.completion.api_key = mask(&config.completion.api_key);
        config.synthesis.api_key = mask(&config.synthesis.api_key);
        config
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn require_positive(key: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(invalid(key, "must be greater than zero"));
    }
    Ok(())
}

fn invalid(key: &str, message: &str) -> TurnError {
    TurnError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxturn_env() {
        for key in [
            "VOXTURN_API_KEY",
            "VOXTURN_MODEL",
            "VOXTURN_SYNTHESIS_API_KEY",
            "VOXTURN_VOICE",
        ] {
            remove_env(key);
        }
    }

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.completion.api_key = "sk-test".to_string();
        config.synthesis.api_key = "el-test".to_string();
        config
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.completion.model, "gpt-4o");
        assert_eq!(config.completion.temperature, 0.1);
        assert_eq!(config.completion.frequency_penalty, 0.9);
        assert_eq!(config.completion.greeting, None);
        assert!(config.completion.api_key.is_empty());

        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_duration_ms, 10);

        assert_eq!(config.pipeline.max_memory_length, 10);
        assert_eq!(config.pipeline.sentence_queue_capacity, 1024);
        assert_eq!(config.pipeline.queue_overflow, OverflowPolicy::Block);
        assert_eq!(config.pipeline.interrupt, InterruptPolicy::FinalOnly);
    }

    #[test]
    fn test_default_audio_format_is_ten_ms_frames() {
        let format = AudioConfig::default().format();
        assert_eq!(format.samples_per_channel, 160);
        assert_eq!(format.frame_size(), 320);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_temp(
            r#"
            [completion]
            api_key = "sk-abc"
            model = "gpt-4o-mini"
            greeting = "Hi there!"
            max_tokens = 256

            [synthesis]
            api_key = "el-abc"
            voice = "alloy"

            [audio]
            sample_rate = 24000
            frame_duration_ms = 20

            [pipeline]
            max_memory_length = 4
            queue_overflow = "drop_newest"

            [pipeline.interrupt]
            mode = "early_trigger"
            min_chars = 3
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.completion.api_key, "sk-abc");
        assert_eq!(config.completion.model, "gpt-4o-mini");
        assert_eq!(config.completion.greeting.as_deref(), Some("Hi there!"));
        assert_eq!(config.completion.max_tokens, 256);
        assert_eq!(config.synthesis.voice, "alloy");
        assert_eq!(config.audio.format().samples_per_channel, 480);
        assert_eq!(config.pipeline.max_memory_length, 4);
        assert_eq!(config.pipeline.queue_overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.pipeline.interrupt, InterruptPolicy::early(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_temp(
            r#"
            [synthesis]
            voice = "custom"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.synthesis.voice, "custom");
        assert_eq!(config.synthesis.model, "eleven_multilingual_v2");
        assert_eq!(config.completion, CompletionConfig::default());
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_env_override_credentials() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxturn_env();

        set_env("VOXTURN_API_KEY", "sk-env");
        set_env("VOXTURN_SYNTHESIS_API_KEY", "el-env");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.completion.api_key, "sk-env");
        assert_eq!(config.synthesis.api_key, "el-env");
        assert_eq!(config.completion.model, "gpt-4o"); // Not overridden

        clear_voxturn_env();
    }

    #[test]
    fn test_env_override_model_and_voice() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxturn_env();

        set_env("VOXTURN_MODEL", "gpt-4.1");
        set_env("VOXTURN_VOICE", "nova");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.completion.model, "gpt-4.1");
        assert_eq!(config.synthesis.voice, "nova");

        clear_voxturn_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxturn_env();

        set_env("VOXTURN_MODEL", "");
        let config = Config::default().with_env_overrides();

        // Empty string should not override default
        assert_eq!(config.completion.model, "gpt-4o");

        clear_voxturn_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_temp(
            r#"
            [completion
            api_key = "broken
        "#,
        );

        let err = Config::load(temp_file.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TurnError>(),
            Some(TurnError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_unknown_overflow_policy_is_rejected() {
        let temp_file = write_temp(
            r#"
            [pipeline]
            queue_overflow = "drop_oldest"
        "#,
        );

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_path_ends_with_app_dir() {
        let path = Config::default_path();
        assert!(path.ends_with("voxturn/config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_voxturn_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_fails_on_invalid_toml() {
        let temp_file = write_temp("[audio\nsample_rate = ");

        let err = Config::load_or_default(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_validate_requires_completion_key() {
        let mut config = valid_config();
        config.completion.api_key = "  ".to_string();

        match config.validate() {
            Err(TurnError::MissingCredential { key }) => assert_eq!(key, "completion.api_key"),
            other => panic!("expected MissingCredential, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_requires_synthesis_key() {
        let mut config = valid_config();
        config.synthesis.api_key.clear();

        let err = config.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("synthesis.api_key"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = valid_config();
        config.pipeline.sentence_queue_capacity = 0;

        match config.validate() {
            Err(TurnError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "pipeline.sentence_queue_capacity")
            }
            other => panic!("expected ConfigInvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_empty_frames() {
        let mut config = valid_config();
        config.audio.sample_rate = 50;
        config.audio.frame_duration_ms = 10;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("audio.frame_duration_ms"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_sampling() {
        let mut config = valid_config();
        config.completion.top_p = 1.5;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.completion.temperature = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_request_timeout() {
        let mut config = valid_config();
        config.synthesis.request_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("synthesis.request_timeout_secs"));
    }

    #[test]
    fn test_redacted_masks_keys() {
        let config = valid_config().redacted();
        assert_eq!(config.completion.api_key, "********");
        assert_eq!(config.synthesis.api_key, "********");
        assert!(Config::default().redacted().completion.api_key.is_empty());
    }

    #[test]
    fn test_to_toml_loads_back() {
        let mut config = valid_config();
        config.pipeline.interrupt = InterruptPolicy::early(2);
        let text = config.to_toml().unwrap();
        let temp_file = write_temp(&text);

        assert_eq!(Config::load(temp_file.path()).unwrap(), config);
    }
}
