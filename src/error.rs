//! Error types for audioscope.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioscopeError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Unsupported sample format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // Device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio output failed: {message}")]
    AudioOutput { message: String },

    // Control surface misuse
    #[error("Invalid operation: {message}")]
    Usage { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl AudioscopeError {
    /// Shorthand for a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Shorthand for a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// True for errors raised synchronously because a format or setting was rejected.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse { .. }
                | Self::ConfigInvalidValue { .. }
                | Self::Config(_)
                | Self::UnsupportedFormat { .. }
                | Self::Configuration { .. }
        )
    }

    /// True for errors caused by calling the control surface in the wrong state.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage { .. })
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, AudioscopeError>;
