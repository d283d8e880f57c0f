//! Hopped, windowed magnitude spectrum.

use crate::clock::samples_to_duration;
use crate::error::{AudioscopeError, Result};
use crate::pipeline::error::{StationError, check_block};
use crate::pipeline::station::Station;
use crate::pipeline::types::{RealFftBlock, SampleBlock, SharedBlock};
use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;
use std::time::Instant;

/// Coefficients of the 4-term Blackman-Harris window.
const BLACKMAN_HARRIS: [f64; 4] = [0.35875, 0.48829, 0.14128, 0.01168];

fn blackman_harris(size: usize) -> Vec<f64> {
    let denom = (size - 1).max(1) as f64;
    (0..size)
        .map(|i| {
            let x = 2.0 * std::f64::consts::PI * i as f64 / denom;
            BLACKMAN_HARRIS[0] - BLACKMAN_HARRIS[1] * x.cos() + BLACKMAN_HARRIS[2] * (2.0 * x).cos()
                - BLACKMAN_HARRIS[3] * (3.0 * x).cos()
        })
        .collect()
}

/// Computes one spectrum every hop period over an N-sample window.
///
/// Frames advance in device time: when a hop runs past the end of the
/// buffer, the shortfall is skipped from the following deliveries instead of
/// being buffered, so frame starts stay on the hop grid. A block that doesn't
/// start where the previous one ended restarts the grid at its own stamp.
pub struct FftProcessor {
    size: usize,
    period_ms: u32,
    window: Vec<f64>,
    window_gain: f64,
    fft: Arc<dyn Fft<f64>>,
    frame: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    sample_rate: u32,
    buffer: Vec<f32>,
    origin: Option<Instant>,
    next_block: Option<Instant>,
    skip: usize,
}

impl FftProcessor {
    /// # Errors
    /// Configuration error unless `size` is a power of two of at least 2
    /// and `period_ms` is positive.
    pub fn new(size: usize, period_ms: u32) -> Result<Self> {
        if size < 2 || !size.is_power_of_two() {
            return Err(AudioscopeError::configuration(format!(
                "FFT size must be a power of two >= 2, got {}",
                size
            )));
        }
        if period_ms == 0 {
            return Err(AudioscopeError::configuration(
                "FFT hop period must be positive",
            ));
        }

        let window = blackman_harris(size);
        let window_gain: f64 = window.iter().sum();
        let fft = FftPlanner::<f64>::new().plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Ok(Self {
            size,
            period_ms,
            window,
            window_gain,
            fft,
            frame: vec![Complex::new(0.0, 0.0); size],
            scratch,
            sample_rate: 0,
            buffer: Vec::with_capacity(size * 2),
            origin: None,
            next_block: None,
            skip: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Samples between successive frame starts at the current rate.
    pub fn hop(&self) -> usize {
        ((self.period_ms as u64 * self.sample_rate as u64 / 1000) as usize).max(1)
    }

    /// Incoming samples still to be discarded before buffering resumes.
    pub fn pending_skip(&self) -> usize {
        self.skip
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds one block and returns the spectra it completed.
    pub fn process_block(&mut self, block: &SampleBlock) -> Vec<RealFftBlock> {
        let contiguous = self.next_block.is_some_and(|end| block.continues(end));
        self.next_block = Some(block.end_time());
        if block.sample_rate != self.sample_rate || !contiguous {
            if block.sample_rate == self.sample_rate && (!self.buffer.is_empty() || self.skip > 0) {
                log::debug!(
                    "fft: input gap, discarding {} buffered samples",
                    self.buffer.len()
                );
            }
            self.sample_rate = block.sample_rate;
            self.buffer.clear();
            self.origin = None;
            self.skip = 0;
        }
        if self.sample_rate == 0 {
            return Vec::new();
        }

        let samples = &block.mono_samples;
        let skipped = self.skip.min(samples.len());
        self.skip -= skipped;
        if skipped == samples.len() {
            return Vec::new();
        }

        let origin = match self.origin {
            Some(origin) if !self.buffer.is_empty() => origin,
            _ => block.timestamp + samples_to_duration(skipped as u64, self.sample_rate),
        };
        self.buffer.extend_from_slice(&samples[skipped..]);

        let hop = self.hop();
        let nyquist = self.sample_rate as f32 / 2.0;
        let mut origin = Some(origin);
        let mut out = Vec::new();

        while self.buffer.len() >= self.size {
            let Some(frame_start) = origin else {
                break;
            };
            out.push(RealFftBlock {
                timestamp: frame_start,
                magnitudes: self.transform(),
                nyquist,
            });

            if hop < self.buffer.len() {
                self.buffer.drain(..hop);
                origin = Some(frame_start + samples_to_duration(hop as u64, self.sample_rate));
            } else {
                self.skip = hop - self.buffer.len();
                self.buffer.clear();
                origin = None;
            }
        }

        self.origin = origin;
        out
    }

    fn transform(&mut self) -> Vec<f64> {
        for ((slot, &sample), &w) in self
            .frame
            .iter_mut()
            .zip(self.buffer.iter())
            .zip(self.window.iter())
        {
            *slot = Complex::new(sample as f64 * w, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.frame, &mut self.scratch);

        self.frame[..=self.size / 2]
            .iter()
            .map(|c| c.norm() / self.window_gain)
            .collect()
    }
}

/// Station wrapper running an [`FftProcessor`] on its own thread.
pub struct FftStation {
    processor: FftProcessor,
}

impl FftStation {
    pub fn new(size: usize, period_ms: u32) -> Result<Self> {
        Ok(Self {
            processor: FftProcessor::new(size, period_ms)?,
        })
    }
}

impl Station for FftStation {
    type Input = SharedBlock;
    type Output = RealFftBlock;

    fn process(&mut self, input: SharedBlock) -> std::result::Result<Vec<RealFftBlock>, StationError> {
        check_block(&input)?;
        Ok(self.processor.process_block(&input))
    }

    fn name(&self) -> &'static str {
        "fft"
    }
}
