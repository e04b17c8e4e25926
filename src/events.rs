//! Inbound and outbound pipeline events.
//!
//! The routing runtime is external; these types are what it hands to and
//! receives from the pipeline. A JSON form exists for logs, fixtures and the
//! `handle_json` entry point.

use crate::error::{Result, TurnError};
use crate::frame::AudioFrame;
use serde::{Deserialize, Serialize};

/// Control commands carried on both sides of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Flush,
}

/// Events consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Recognized user speech.
    TranscribedText {
        text: String,
        is_final: bool,
        stream_id: u32,
        #[serde(default)]
        end_of_segment: bool,
    },
    Command { command: ControlCommand },
}

impl InboundEvent {
    /// A finalized transcription on stream 0.
    pub fn final_text(text: impl Into<String>) -> Self {
        InboundEvent::TranscribedText {
            text: text.into(),
            is_final: true,
            stream_id: 0,
            end_of_segment: true,
        }
    }

    /// A partial transcription on stream 0.
    pub fn partial_text(text: impl Into<String>) -> Self {
        InboundEvent::TranscribedText {
            text: text.into(),
            is_final: false,
            stream_id: 0,
            end_of_segment: false,
        }
    }

    pub fn flush() -> Self {
        InboundEvent::Command {
            command: ControlCommand::Flush,
        }
    }

    /// Serialize event to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Parses an inbound event, classifying failures as malformed events.
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_json(s).map_err(|e| TurnError::MalformedEvent {
            message: e.to_string(),
        })
    }
}

/// Events produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// One sentence of the reply, or the end-of-segment marker closing a turn.
    PartialText { text: String, end_of_segment: bool },
    AudioFrame(AudioFrame),
    Command { command: ControlCommand },
}

impl OutboundEvent {
    pub fn flush() -> Self {
        OutboundEvent::Command {
            command: ControlCommand::Flush,
        }
    }

    pub fn is_flush(&self) -> bool {
        matches!(
            self,
            OutboundEvent::Command {
                command: ControlCommand::Flush
            }
        )
    }

    pub fn as_audio(&self) -> Option<&AudioFrame> {
        match self {
            OutboundEvent::AudioFrame(frame) => Some(frame),
            _ => None,
        }
    }

    /// Serialize event to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from JSON string.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
