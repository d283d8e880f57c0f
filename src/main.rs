use anyhow::Result;
use audioscope::app::{MonitorOptions, run_monitor};
use audioscope::cli::{Cli, Commands};
use audioscope::config::Config;
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    log::debug!("audioscope {}", audioscope::version_string());

    match cli.command {
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Monitor {
            input_device,
            output_device,
            no_output,
            duration,
            synthetic,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_monitor(
                config,
                MonitorOptions {
                    input_device,
                    output_device,
                    no_output,
                    duration,
                    synthetic,
                    quiet: cli.quiet,
                },
            )?;
        }
    }

    Ok(())
}

/// Install the logger; `RUST_LOG` takes precedence over the flags.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => log::LevelFilter::Error,
        (false, 0) => log::LevelFilter::Warn,
        (false, 1) => log::LevelFilter::Info,
        (false, 2) => log::LevelFilter::Debug,
        (false, _) => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path)?
    } else {
        // Try default path, fall back to defaults
        let default_path = Config::default_path()?;
        Config::load_or_default(&default_path)?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

/// List available audio devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    audioscope::app::list_audio_devices()?;
    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    anyhow::bail!("built without audio device support")
}
