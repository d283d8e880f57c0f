//! audioscope - live audio level and spectrum monitoring
//!
//! Captures audio on a device-derived clock, fans it out to RMS and FFT
//! processors and replays it to an output device, so results can be shown
//! when the audio they describe is actually heard.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod pipeline;

#[cfg(feature = "cli")]
pub mod cli;

// Composition root for the binary
#[cfg(feature = "cli")]
pub mod app;

// Core traits (source → pipe → sink)
pub use audio::device::{CaptureDevice, RenderDevice, RenderDeviceFactory};
pub use audio::source::{AudioInputSource, AudioSource, InputSource};

// Control surface
pub use engine::{Engine, EngineConfig, EngineState};

// Error handling
pub use error::{AudioscopeError, Result};

// Config
pub use config::Config;

// Results
pub use pipeline::queue::TimedDataQueue;
pub use pipeline::types::{RealFftBlock, RmsBlock, SampleBlock, Timestamped};

// Station framework (for custom processors)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
