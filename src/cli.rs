//! Command-line interface for voxturn
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Interruptible turn pipeline for spoken-dialogue agents
#[derive(Parser, Debug)]
#[command(
    name = "voxturn",
    version,
    about = "Interruptible turn pipeline for spoken-dialogue agents"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: debug, -vv: trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a conversation from stdin against scripted backends
    Simulate {
        /// Write synthesized audio to this WAV file
        #[arg(long, value_name = "PATH")]
        wav: Option<PathBuf>,

        /// Delay per completion delta and synthesis read (e.g., 20ms, 0s)
        #[arg(long, value_name = "DURATION", default_value = "20ms", value_parser = parse_duration)]
        delay: Duration,

        /// Pause after each input line (e.g., 1s, 500ms)
        #[arg(long, value_name = "DURATION", default_value = "1s", value_parser = parse_duration)]
        gap: Duration,

        /// When recognized text interrupts the reply (default: from config)
        #[arg(long, value_enum, value_name = "POLICY")]
        interrupt_policy: Option<InterruptMode>,

        /// Minimum partial length for the early-trigger policy
        #[arg(
            long,
            value_name = "CHARS",
            default_value_t = crate::defaults::EARLY_TRIGGER_MIN_CHARS
        )]
        min_chars: usize,
    },

    /// View and check configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Command-line spelling of the interrupt policy.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptMode {
    /// Interrupt on final transcriptions only
    FinalOnly,
    /// Also interrupt on long enough partial transcriptions
    EarlyTrigger,
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration with credentials masked
    Show,
    /// Print the configuration file path
    Path,
    /// Validate the effective configuration
    Check,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime` plus bare numbers
/// as milliseconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
