//! Error types for voxturn.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TurnError {
    // Configuration errors (fatal at startup)
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Missing required credential: {key}")]
    MissingCredential { key: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Backend errors (abandon the current item only)
    #[error("{backend} backend error: {message}")]
    Backend { backend: String, message: String },

    #[error("{backend} stream truncated after {received} bytes: {message}")]
    StreamTruncated {
        backend: String,
        received: usize,
        message: String,
    },

    // Inbound event errors (event is dropped)
    #[error("Malformed event: {message}")]
    MalformedEvent { message: String },

    #[error("Event JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Plumbing
    #[error("Channel closed: {channel}")]
    ChannelClosed { channel: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl TurnError {
    /// Shorthand for a backend failure.
    pub fn backend(backend: &str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    /// Returns true for errors that must stop pipeline construction.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigFileNotFound { .. }
                | Self::ConfigParse { .. }
                | Self::ConfigInvalidValue { .. }
                | Self::MissingCredential { .. }
                | Self::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TurnError>;
