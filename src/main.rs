use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use voxturn::cli::{Cli, Commands, ConfigAction, InterruptMode};
use voxturn::config::Config;
use voxturn::error::TurnError;
use voxturn::interrupt::InterruptPolicy;
use voxturn::simulate::{SimulateOptions, run_simulate};
use voxturn::sink::{EventSink, TextPrinter, WavFrameSink};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::debug!(version = %voxturn::version_string(), "voxturn starting");

    match cli.command {
        Commands::Simulate {
            wav,
            delay,
            gap,
            interrupt_policy,
            min_chars,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let options = SimulateOptions {
                delay,
                gap,
                interrupt: interrupt_policy.map(|mode| match mode {
                    InterruptMode::FinalOnly => InterruptPolicy::FinalOnly,
                    InterruptMode::EarlyTrigger => InterruptPolicy::early(min_chars),
                }),
            };

            let mut sinks: Vec<Box<dyn EventSink>> =
                vec![Box::new(TextPrinter::new(std::io::stdout()))];
            if let Some(path) = &wav {
                let sink = WavFrameSink::create(path, config.audio.format())
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                sinks.push(Box::new(sink));
            }

            eprintln!(
                "Type a line per user turn; '~text' is partial, '!flush' interrupts. Ctrl+D ends."
            );
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            let summary = run_simulate(config, options, input, sinks).await?;

            eprintln!(
                "{} lines, {} text events, {} audio frames, {} flushes, {} malformed",
                summary.lines,
                summary.text_events,
                summary.audio_frames,
                summary.flushes,
                summary.dropped_events
            );
            if let Some(path) = wav {
                eprintln!("Audio written to {}", path.display());
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
    }

    Ok(())
}

/// Installs the stderr log subscriber.
///
/// RUST_LOG wins when set; otherwise `-v` counts pick the level.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "voxturn=info",
        1 => "voxturn=debug",
        _ => "voxturn=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/voxturn/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        if !path.exists() {
            return Err(TurnError::ConfigFileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.redacted().to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
        ConfigAction::Check => {
            let config = load_config(custom_path)?;
            match config.validate() {
                Ok(()) => println!("Configuration OK"),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}
