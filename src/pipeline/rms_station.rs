//! Windowed RMS level with a recent-peak backlog.

use crate::clock::samples_to_duration;
use crate::defaults;
use crate::pipeline::error::{StationError, check_block};
use crate::pipeline::station::Station;
use crate::pipeline::types::{RmsBlock, SampleBlock, SharedBlock};
use std::time::Instant;

/// Splits the mono stream into 100 ms windows and emits one [`RmsBlock`] per window.
///
/// Leftover samples carry over to the next block. The buffer origin resyncs to
/// the incoming block's timestamp whenever the buffer is empty, the sample
/// rate changes, or the block doesn't start where the previous one ended, so
/// a missed delivery never shifts later windows onto the wrong audio.
#[derive(Debug)]
pub struct RmsProcessor {
    origin: Option<Instant>,
    next_block: Option<Instant>,
    sample_rate: u32,
    buffer: Vec<f32>,
    backlog: [f32; defaults::RMS_BACKLOG],
    backlog_index: usize,
}

impl Default for RmsProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RmsProcessor {
    pub fn new() -> Self {
        Self {
            origin: None,
            next_block: None,
            sample_rate: 0,
            buffer: Vec::new(),
            backlog: [0.0; defaults::RMS_BACKLOG],
            backlog_index: 0,
        }
    }

    /// Samples per window at the current rate.
    pub fn window_len(&self) -> usize {
        (self.sample_rate / defaults::RMS_WINDOWS_PER_SECOND) as usize
    }

    /// Highest RMS currently in the backlog.
    pub fn recent_peak(&self) -> f32 {
        self.backlog.iter().copied().fold(0.0, f32::max)
    }

    /// Samples waiting for a complete window.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feeds one block and returns the windows it completed.
    pub fn process_block(&mut self, block: &SampleBlock) -> Vec<RmsBlock> {
        let contiguous = self.next_block.is_some_and(|end| block.continues(end));
        self.next_block = Some(block.end_time());
        if !contiguous && !self.buffer.is_empty() && self.sample_rate == block.sample_rate {
            log::debug!(
                "rms: input gap, discarding {} buffered samples",
                self.buffer.len()
            );
        }

        let origin = match self.origin {
            Some(origin)
                if contiguous && !self.buffer.is_empty() && self.sample_rate == block.sample_rate =>
            {
                self.buffer.extend_from_slice(&block.mono_samples);
                origin
            }
            _ => {
                self.sample_rate = block.sample_rate;
                self.buffer.clear();
                self.buffer.extend_from_slice(&block.mono_samples);
                block.timestamp
            }
        };

        let per_window = self.window_len();
        if per_window == 0 {
            self.origin = Some(origin);
            return Vec::new();
        }

        let mut out = Vec::with_capacity(self.buffer.len() / per_window);
        let mut processed = 0usize;
        while self.buffer.len() - processed >= per_window {
            let window = &self.buffer[processed..processed + per_window];
            let sum: f64 = window.iter().map(|&s| (s as f64) * (s as f64)).sum();
            let rms = (sum / per_window as f64).sqrt() as f32;

            self.backlog[self.backlog_index] = rms;
            self.backlog_index = (self.backlog_index + 1) % self.backlog.len();

            out.push(RmsBlock {
                timestamp: origin + samples_to_duration(processed as u64, self.sample_rate),
                current: rms,
                recent_peak: self.recent_peak(),
            });
            processed += per_window;
        }

        self.buffer.drain(..processed);
        self.origin = Some(origin + samples_to_duration(processed as u64, self.sample_rate));
        out
    }
}

/// Station wrapper running an [`RmsProcessor`] on its own thread.
#[derive(Debug, Default)]
pub struct RmsStation {
    processor: RmsProcessor,
}

impl RmsStation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Station for RmsStation {
    type Input = SharedBlock;
    type Output = RmsBlock;

    fn process(&mut self, input: SharedBlock) -> Result<Vec<RmsBlock>, StationError> {
        check_block(&input)?;
        Ok(self.processor.process_block(&input))
    }

    fn name(&self) -> &'static str {
        "rms"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipe::Publisher;
    use std::sync::Arc;
    use std::time::Duration;

    fn block(t: Instant, rate: u32, samples: Vec<f32>) -> SampleBlock {
        SampleBlock {
            timestamp: t,
            sample_rate: rate,
            channel_count: 1,
            original_samples: samples.clone(),
            mono_samples: samples,
        }
    }

    #[test]
    fn test_constant_signal_rms() {
        let t0 = Instant::now();
        let mut rms = RmsProcessor::new();
        let out = rms.process_block(&block(t0, 48000, vec![0.5; 4800]));
        assert_eq!(out.len(), 1);
        assert!((out[0].current - 0.5).abs() < 1e-6);
        assert_eq!(out[0].timestamp, t0);
        assert!((out[0].recent_peak - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_windows_are_stamped_from_origin() {
        let t0 = Instant::now();
        let mut rms = RmsProcessor::new();
        let out = rms.process_block(&block(t0, 8000, vec![0.1; 2500]));
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].timestamp, t0 + Duration::from_millis(100));
        assert_eq!(out[2].timestamp, t0 + Duration::from_millis(200));
        assert_eq!(rms.buffered(), 100);

        // The leftover 100 samples continue at 300 ms into the next contiguous block.
        let next = t0 + Duration::from_micros(312_500);
        let out = rms.process_block(&block(next, 8000, vec![0.1; 700]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, t0 + Duration::from_millis(300));
    }

    #[test]
    fn test_gap_in_input_discards_partial_window() {
        let t0 = Instant::now();
        let mut rms = RmsProcessor::new();
        let out = rms.process_block(&block(t0, 8000, vec![0.1; 1200]));
        assert_eq!(out.len(), 1);
        assert_eq!(rms.buffered(), 400);

        // The block covering 150..300 ms never arrived.
        let later = t0 + Duration::from_millis(300);
        let out = rms.process_block(&block(later, 8000, vec![0.9; 1200]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, later);
        assert!((out[0].current - 0.9).abs() < 1e-6);
        assert_eq!(rms.buffered(), 400);
    }

    #[test]
    fn test_missed_delivery_keeps_windows_on_their_audio() {
        let publisher = Publisher::new();
        let rx = publisher.subscribe("rms", 1);
        let t0 = Instant::now();
        let blocks: Vec<SharedBlock> = [(0, 0.1), (150, 0.5), (300, 0.9)]
            .into_iter()
            .map(|(ms, level)| {
                Arc::new(block(t0 + Duration::from_millis(ms), 8000, vec![level; 1200]))
            })
            .collect();

        let mut station = RmsStation::new();
        let mut levels = Vec::new();
        assert_eq!(publisher.publish(&blocks[0]), 1);
        assert_eq!(publisher.publish(&blocks[1]), 0);
        levels.extend(station.process(rx.recv().unwrap()).unwrap());
        assert_eq!(publisher.publish(&blocks[2]), 1);
        levels.extend(station.process(rx.recv().unwrap()).unwrap());

        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].timestamp, t0);
        assert_eq!(levels[1].timestamp, t0 + Duration::from_millis(300));
        assert!((levels[1].current - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_station_reports_unusable_blocks() {
        let mut station = RmsStation::new();
        let empty = Arc::new(block(Instant::now(), 8000, Vec::new()));
        assert!(matches!(station.process(empty), Err(StationError::Recoverable(_))));
        let no_rate = Arc::new(block(Instant::now(), 0, vec![0.5; 800]));
        assert!(matches!(station.process(no_rate), Err(StationError::Recoverable(_))));

        let out = station.process(Arc::new(block(Instant::now(), 8000, vec![0.5; 800])));
        assert_eq!(out.unwrap().len(), 1);
    }

    #[test]
    fn test_empty_buffer_resyncs_to_block_stamp() {
        let t0 = Instant::now();
        let mut rms = RmsProcessor::new();
        rms.process_block(&block(t0, 8000, vec![0.1; 800]));
        assert_eq!(rms.buffered(), 0);

        let later = t0 + Duration::from_secs(3);
        let out = rms.process_block(&block(later, 8000, vec![0.1; 800]));
        assert_eq!(out[0].timestamp, later);
    }

    #[test]
    fn test_sample_rate_change_discards_buffer() {
        let t0 = Instant::now();
        let mut rms = RmsProcessor::new();
        rms.process_block(&block(t0, 8000, vec![0.9; 500]));
        assert_eq!(rms.buffered(), 500);

        let t1 = t0 + Duration::from_secs(1);
        let out = rms.process_block(&block(t1, 16000, vec![0.2; 1600]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, t1);
        assert!((out[0].current - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_recent_peak_decays_after_backlog_rolls_over() {
        let t0 = Instant::now();
        let mut rms = RmsProcessor::new();
        rms.process_block(&block(t0, 8000, vec![1.0; 800]));
        assert_eq!(rms.recent_peak(), 1.0);

        let quiet = rms.process_block(&block(t0, 8000, vec![0.25; 800 * 31]));
        assert_eq!(quiet.last().map(|b| b.recent_peak), Some(1.0));

        let out = rms.process_block(&block(t0, 8000, vec![0.25; 800]));
        assert!((out[0].recent_peak - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_station_name() {
        assert_eq!(RmsStation::new().name(), "rms");
    }
}
