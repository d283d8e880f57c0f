//! PCM stream format description.

use crate::clock::samples_to_duration;
use crate::error::{AudioscopeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Numeric representation of one PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    SignedInt,
    UnsignedInt,
    Float,
}

/// Format of an interleaved PCM stream as negotiated with a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub sample_type: SampleType,
    pub bits: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channel_count: u16, sample_type: SampleType, bits: u16) -> Self {
        Self {
            sample_rate,
            channel_count,
            sample_type,
            bits,
        }
    }

    /// 32-bit float format, the format every output device is opened with.
    pub fn float32(sample_rate: u32, channel_count: u16) -> Self {
        Self::new(sample_rate, channel_count, SampleType::Float, 32)
    }

    /// Checks the parts of the format the pipeline itself depends on.
    ///
    /// Sample type and width are checked separately by the converter.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AudioscopeError::configuration("sample rate must be positive"));
        }
        if !(1..=2).contains(&self.channel_count) {
            return Err(AudioscopeError::configuration(format!(
                "only mono and stereo streams are supported, got {} channels",
                self.channel_count
            )));
        }
        Ok(())
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits / 8) as usize
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channel_count as usize
    }

    /// Duration of `samples` interleaved samples.
    pub fn duration_of_samples(&self, samples: u64) -> Duration {
        let channels = self.channel_count.max(1) as u64;
        samples_to_duration(samples / channels, self.sample_rate)
    }

    /// Duration of `bytes` bytes of interleaved PCM.
    pub fn duration_of_bytes(&self, bytes: usize) -> Duration {
        let frame = self.bytes_per_frame();
        if frame == 0 {
            return Duration::ZERO;
        }
        samples_to_duration((bytes / frame) as u64, self.sample_rate)
    }

    /// Number of bytes holding `millis` milliseconds of audio.
    pub fn bytes_for_millis(&self, millis: u32) -> usize {
        let frames = self.sample_rate as u64 * millis as u64 / 1000;
        frames as usize * self.bytes_per_frame()
    }

    /// Short tag such as `s16` or `f32`.
    pub fn sample_tag(&self) -> String {
        let prefix = match self.sample_type {
            SampleType::SignedInt => 's',
            SampleType::UnsignedInt => 'u',
            SampleType::Float => 'f',
        };
        format!("{}{}", prefix, self.bits)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {}ch, {}",
            self.sample_rate,
            self.channel_count,
            self.sample_tag()
        )
    }
}

/// Sample type and width parsed from a tag like `s16`, `u32` or `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    pub sample_type: SampleType,
    pub bits: u16,
}

impl FromStr for SampleSpec {
    type Err = AudioscopeError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        let unsupported = || AudioscopeError::UnsupportedFormat { format: s.clone() };

        let mut chars = s.chars();
        let sample_type = match chars.next() {
            Some('s') | Some('i') => SampleType::SignedInt,
            Some('u') => SampleType::UnsignedInt,
            Some('f') => SampleType::Float,
            _ => return Err(unsupported()),
        };
        let bits: u16 = chars.as_str().parse().map_err(|_| unsupported())?;
        Ok(Self { sample_type, bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_and_durations() {
        let format = AudioFormat::new(48000, 2, SampleType::SignedInt, 16);
        assert_eq!(format.bytes_per_sample(), 2);
        assert_eq!(format.bytes_per_frame(), 4);
        assert_eq!(format.duration_of_bytes(48000 * 4), Duration::from_secs(1));
        assert_eq!(format.duration_of_samples(9600), Duration::from_millis(100));
        assert_eq!(format.bytes_for_millis(100), 4800 * 4);
    }

    #[test]
    fn test_validate_rejects_surround_and_zero_rate() {
        assert!(AudioFormat::float32(48000, 1).validate().is_ok());
        assert!(AudioFormat::float32(48000, 2).validate().is_ok());
        assert!(AudioFormat::float32(48000, 6).validate().is_err());
        assert!(AudioFormat::float32(0, 1).validate().is_err());
    }

    #[test]
    fn test_display() {
        let format = AudioFormat::new(44100, 1, SampleType::UnsignedInt, 32);
        assert_eq!(format.to_string(), "44100 Hz, 1ch, u32");
    }

    #[test]
    fn test_parse_sample_spec() {
        let spec: SampleSpec = "s16".parse().unwrap();
        assert_eq!(spec.sample_type, SampleType::SignedInt);
        assert_eq!(spec.bits, 16);

        let spec: SampleSpec = "F32".parse().unwrap();
        assert_eq!(spec.sample_type, SampleType::Float);

        assert!("x16".parse::<SampleSpec>().is_err());
        assert!("s".parse::<SampleSpec>().is_err());
    }
}
