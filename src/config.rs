use crate::audio::convert::SampleConverter;
use crate::audio::format::{AudioFormat, SampleSpec};
use crate::defaults;
use crate::engine::EngineConfig;
use crate::error::{AudioscopeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub analysis: AnalysisConfig,
}

/// Capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: String,
    pub period_frames: u32,
}

/// Monitoring output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub enabled: bool,
    pub device: Option<String>,
    pub buffer_ms: u32,
    pub drop_ms: u32,
    pub null_latency_ms: u32,
}

/// Processor and queue sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fft_size: usize,
    pub fft_period_ms: u32,
    pub channel_capacity: usize,
    pub queue_capacity: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            sample_format: defaults::SAMPLE_FORMAT.to_string(),
            period_frames: defaults::PERIOD_FRAMES,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: None,
            buffer_ms: defaults::OUTPUT_BUFFER_MS,
            drop_ms: defaults::OUTPUT_DROP_MS,
            null_latency_ms: defaults::NULL_OUTPUT_LATENCY_MS,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: defaults::FFT_SIZE,
            fft_period_ms: defaults::FFT_PERIOD_MS,
            channel_capacity: defaults::CHANNEL_CAPACITY,
            queue_capacity: defaults::QUEUE_CAPACITY,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> AudioscopeError {
    AudioscopeError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file can't be read or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(AudioscopeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - AUDIOSCOPE_INPUT_DEVICE → input.device
    /// - AUDIOSCOPE_OUTPUT_DEVICE → output.device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("AUDIOSCOPE_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.input.device = Some(device);
        }

        if let Ok(device) = std::env::var("AUDIOSCOPE_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.output.device = Some(device);
        }

        self
    }

    /// Rejects values the engine and processors can't run with.
    pub fn validate(&self) -> Result<()> {
        if self.input.sample_rate == 0 {
            return Err(invalid("input.sample_rate", "must be positive"));
        }
        if !(1..=2).contains(&self.input.channels) {
            return Err(invalid("input.channels", "must be 1 or 2"));
        }
        if self.input.period_frames == 0 {
            return Err(invalid("input.period_frames", "must be positive"));
        }
        self.input_format()?;

        if self.output.buffer_ms == 0 {
            return Err(invalid("output.buffer_ms", "must be positive"));
        }
        if self.output.drop_ms == 0 {
            return Err(invalid("output.drop_ms", "must be positive"));
        }

        let fft_size = self.analysis.fft_size;
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(invalid(
                "analysis.fft_size",
                format!("must be a power of two >= 2, got {}", fft_size),
            ));
        }
        if self.analysis.fft_period_ms == 0 {
            return Err(invalid("analysis.fft_period_ms", "must be positive"));
        }
        if self.analysis.channel_capacity == 0 {
            return Err(invalid("analysis.channel_capacity", "must be positive"));
        }
        if self.analysis.queue_capacity == 0 {
            return Err(invalid("analysis.queue_capacity", "must be positive"));
        }
        Ok(())
    }

    /// Capture format described by the `[input]` section.
    pub fn input_format(&self) -> Result<AudioFormat> {
        let spec: SampleSpec = self.input.sample_format.parse()?;
        SampleConverter::for_format(spec.sample_type, spec.bits)?;
        let format = AudioFormat::new(
            self.input.sample_rate,
            self.input.channels,
            spec.sample_type,
            spec.bits,
        );
        format.validate()?;
        Ok(format)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            output_buffer_ms: self.output.buffer_ms,
            drop_ms: self.output.drop_ms,
            null_latency: Duration::from_millis(self.output.null_latency_ms as u64),
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/audioscope/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("audioscope").join("config.toml"))
            .ok_or_else(|| AudioscopeError::configuration("could not determine config directory"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleType;
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

    fn clear_audioscope_env() {
        remove_env("AUDIOSCOPE_INPUT_DEVICE");
        remove_env("AUDIOSCOPE_OUTPUT_DEVICE");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.input.device, None);
        assert_eq!(config.input.sample_rate, 48000);
        assert_eq!(config.input.channels, 1);
        assert_eq!(config.input.sample_format, "s16");
        assert_eq!(config.input.period_frames, 1024);

        assert!(config.output.enabled);
        assert_eq!(config.output.buffer_ms, 100);
        assert_eq!(config.output.drop_ms, 500);
        assert_eq!(config.output.null_latency_ms, 0);

        assert_eq!(config.analysis.fft_size, 4096);
        assert_eq!(config.analysis.fft_period_ms, 25);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [input]
            device = "hw:0"
            sample_rate = 44100
            channels = 2
            sample_format = "f32"
            period_frames = 512

            [output]
            enabled = false
            device = "pulse"
            buffer_ms = 40
            drop_ms = 250
            null_latency_ms = 20

            [analysis]
            fft_size = 2048
            fft_period_ms = 10
            channel_capacity = 8
            queue_capacity = 32
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.input.device, Some("hw:0".to_string()));
        assert_eq!(
            config.input_format().unwrap(),
            AudioFormat::new(44100, 2, SampleType::Float, 32)
        );
        assert!(!config.output.enabled);
        assert_eq!(config.output.device, Some("pulse".to_string()));
        assert_eq!(config.analysis.fft_size, 2048);
        assert_eq!(config.analysis.queue_capacity, 32);

        let engine = config.engine_config();
        assert_eq!(engine.output_buffer_ms, 40);
        assert_eq!(engine.drop_ms, 250);
        assert_eq!(engine.null_latency, Duration::from_millis(20));
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [analysis]
            fft_size = 1024
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.analysis.fft_size, 1024);
        assert_eq!(config.analysis.fft_period_ms, 25);
        assert_eq!(config.input, InputConfig::default());
        assert_eq!(config.output, OutputConfig::default());
    }

    #[test]
    fn test_env_override_devices() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_audioscope_env();

        set_env("AUDIOSCOPE_INPUT_DEVICE", "hw:1,0");
        set_env("AUDIOSCOPE_OUTPUT_DEVICE", "pulse");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.input.device, Some("hw:1,0".to_string()));
        assert_eq!(config.output.device, Some("pulse".to_string()));

        clear_audioscope_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_audioscope_env();

        set_env("AUDIOSCOPE_INPUT_DEVICE", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.input.device, None);

        clear_audioscope_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [input
            device = "broken
        "#,
        );

        let result = Config::load(temp_file.path());
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_audioscope_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_rejects_invalid_toml() {
        let temp_file = write_config("[output\nbuffer_ms = ");
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.analysis.fft_size = 1000;
        assert!(matches!(
            config.validate(),
            Err(AudioscopeError::ConfigInvalidValue { ref key, .. }) if key == "analysis.fft_size"
        ));

        let mut config = Config::default();
        config.input.channels = 6;
        assert!(config.validate().unwrap_err().is_configuration());

        let mut config = Config::default();
        config.input.sample_format = "s24".to_string();
        assert!(config.validate().unwrap_err().is_configuration());

        let mut config = Config::default();
        config.output.drop_ms = 0;
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path().unwrap();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("audioscope"));
        assert!(path_str.ends_with("config.toml"));
    }
}
