//! Data types flowing through the analysis pipeline.
//!
//! Every block carries a timestamp in the device clock domain: the moment the
//! first sample it describes was captured, not when it was delivered.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Anything stamped with a capture-clock instant.
pub trait Timestamped {
    fn timestamp(&self) -> Instant;
}

/// One read cycle of captured audio, immutable once published.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// Capture time of the first frame.
    pub timestamp: Instant,
    pub sample_rate: u32,
    /// Channel count of `original_samples`.
    pub channel_count: u16,
    /// Sum of all channels per frame.
    pub mono_samples: Vec<f32>,
    /// Interleaved samples as read from the source.
    pub original_samples: Vec<f32>,
}

/// Sample blocks are shared read-only between all subscribers.
pub type SharedBlock = Arc<SampleBlock>;

impl SampleBlock {
    /// Number of frames in the block.
    pub fn frames(&self) -> usize {
        self.mono_samples.len()
    }

    /// Audio duration covered by the block.
    pub fn duration(&self) -> Duration {
        crate::clock::samples_to_duration(self.frames() as u64, self.sample_rate)
    }

    /// Capture time just past the last frame.
    pub fn end_time(&self) -> Instant {
        self.timestamp + self.duration()
    }

    /// Whether this block starts where a block ending at `previous_end` left off,
    /// within one sample.
    pub fn continues(&self, previous_end: Instant) -> bool {
        let gap = self
            .timestamp
            .saturating_duration_since(previous_end)
            .max(previous_end.saturating_duration_since(self.timestamp));
        gap <= crate::clock::samples_to_duration(1, self.sample_rate)
    }
}

impl Timestamped for SampleBlock {
    fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

impl Timestamped for Arc<SampleBlock> {
    fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

/// Magnitude spectrum of one FFT window.
#[derive(Debug, Clone, PartialEq)]
pub struct RealFftBlock {
    /// Capture time of the first sample in the window.
    pub timestamp: Instant,
    /// `N/2 + 1` bin magnitudes, normalized so a full-scale DC input reads 1 in bin 0.
    pub magnitudes: Vec<f64>,
    /// Half the sample rate.
    pub nyquist: f32,
}

impl RealFftBlock {
    /// Frequency spacing between adjacent bins in Hz.
    pub fn bin_width(&self) -> f32 {
        if self.magnitudes.len() < 2 {
            return 0.0;
        }
        self.nyquist / (self.magnitudes.len() - 1) as f32
    }

    /// Frequency of the strongest non-DC bin, or `None` for an empty spectrum.
    pub fn peak_frequency(&self) -> Option<f32> {
        self.magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(bin, _)| bin as f32 * self.bin_width())
    }
}

impl Timestamped for RealFftBlock {
    fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

/// Level of one 100 ms window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmsBlock {
    /// Capture time of the first sample in the window.
    pub timestamp: Instant,
    pub current: f32,
    /// Highest RMS over the recent backlog of windows.
    pub recent_peak: f32,
}

impl Timestamped for RmsBlock {
    fn timestamp(&self) -> Instant {
        self.timestamp
    }
}
