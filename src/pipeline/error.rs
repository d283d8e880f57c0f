//! Error types and reporting for analysis stations.

use crate::pipeline::types::SampleBlock;
use std::fmt;

/// Errors that can occur during station processing.
#[derive(Debug, Clone)]
pub enum StationError {
    /// Recoverable error that allows the station to continue processing.
    Recoverable(String),
    /// Fatal error that requires the station to shut down.
    Fatal(String),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

/// Rejects blocks no analysis can use: no sample rate or no frames.
///
/// The processor's state is left untouched, so the next valid block carries on.
pub fn check_block(block: &SampleBlock) -> Result<(), StationError> {
    if block.sample_rate == 0 {
        return Err(StationError::Recoverable(
            "block without a sample rate".to_string(),
        ));
    }
    if block.mono_samples.is_empty() {
        return Err(StationError::Recoverable("empty block".to_string()));
    }
    Ok(())
}

/// Trait for reporting station errors.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, station: &str, error: &StationError);
}

/// Reporter writing through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(_) => log::warn!("[{}] {}", station, error),
            StationError::Fatal(_) => log::error!("[{}] {}", station, error),
        }
    }
}
