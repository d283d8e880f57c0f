//! Command-line interface for audioscope
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Live audio level and spectrum monitor
#[derive(Parser, Debug)]
#[command(name = "audioscope", version, about = "Live audio level and spectrum monitor")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List audio input and output devices
    Devices,

    /// Capture, analyze and print levels as they become audible
    Monitor {
        /// Audio input device (e.g., hw:0)
        #[arg(long, value_name = "DEVICE")]
        input_device: Option<String>,

        /// Audio output device used for monitoring
        #[arg(long, value_name = "DEVICE")]
        output_device: Option<String>,

        /// Don't play the captured audio
        #[arg(long)]
        no_output: bool,

        /// How long to run (default: 10s). Examples: 30s, 5m, 1h30m
        #[arg(long, short = 'd', value_name = "DURATION", default_value = "10s", value_parser = parse_duration)]
        duration: Duration,

        /// Use a generated sine of this frequency instead of a capture device
        #[arg(long, value_name = "HZ")]
        synthetic: Option<f32>,
    },
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
