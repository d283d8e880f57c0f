//! Output drivers and the sink clock.
//!
//! A driver's `time()` is the virtual-clock position of the sample currently
//! leaving the speaker. Consumers compare result timestamps against it to
//! show what is audible rather than what was just produced.

use crate::audio::device::RenderDevice;
use crate::audio::format::AudioFormat;
use crate::clock::{SharedClock, offset_instant};
use crate::error::{AudioscopeError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clock bookkeeping shared between the pipe thread (writer) and sink clock readers.
struct OutputState {
    device: Box<dyn RenderDevice>,
    format: AudioFormat,
    /// Samples the device could not take yet, interleaved.
    overflow: Vec<f32>,
    t0: Option<Instant>,
    buffer_delay: Duration,
    dropped: Duration,
    dropped_samples: u64,
    bytes: Vec<u8>,
}

impl OutputState {
    fn time(&self, now: Instant) -> Instant {
        let Some(t0) = self.t0 else {
            return now;
        };
        let overflow_delay = self.format.duration_of_samples(self.overflow.len() as u64);
        offset_instant(
            t0,
            self.device.processed_time() + self.dropped,
            self.buffer_delay + overflow_delay,
        )
    }

    /// Writes as much of `samples` as the device takes, returning the count written.
    fn write_device(&mut self, samples: &[f32]) -> Result<usize> {
        self.bytes.clear();
        self.bytes.reserve(samples.len() * 4);
        for sample in samples {
            self.bytes.extend_from_slice(&sample.to_le_bytes());
        }
        let written = self
            .device
            .write(&self.bytes)
            .map_err(|e| AudioscopeError::AudioOutput {
                message: format!("write to '{}' failed: {}", self.device.name(), e),
            })?;
        Ok(written / 4)
    }
}

/// Renders to a device through a bounded software overflow buffer.
///
/// When the device can't keep up and the overflow would reach the drop
/// threshold, everything queued is discarded and the discarded duration is
/// added to the clock, so `time()` jumps forward instead of falling behind.
pub struct AudioOutputDriver {
    state: Arc<RwLock<OutputState>>,
    clock: SharedClock,
    drop_threshold: usize,
}

impl AudioOutputDriver {
    /// Wraps an unopened render device.
    ///
    /// `drop_ms` is the amount of overflowing audio at which queued audio is dropped.
    pub fn new(device: Box<dyn RenderDevice>, drop_ms: u32, clock: SharedClock) -> Self {
        let format = device.format();
        let drop_threshold = (drop_ms as u64 * format.sample_rate as u64 / 1000) as usize
            * format.channel_count.max(1) as usize;
        Self {
            state: Arc::new(RwLock::new(OutputState {
                device,
                format,
                overflow: Vec::new(),
                t0: None,
                buffer_delay: Duration::ZERO,
                dropped: Duration::ZERO,
                dropped_samples: 0,
                bytes: Vec::new(),
            })),
            clock,
            drop_threshold: drop_threshold.max(1),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        let mut state = self.state.write();
        state.device.open()?;
        state.t0 = Some(self.clock.now());
        state.buffer_delay = state.format.duration_of_bytes(state.device.buffer_size());
        state.overflow.clear();
        log::info!(
            "output started on '{}' ({}), buffer delay {:?}, drop threshold {} samples",
            state.device.name(),
            state.format,
            state.buffer_delay,
            self.drop_threshold
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        let mut state = self.state.write();
        if state.t0.take().is_some() {
            state.device.close();
            log::debug!(
                "output stopped on '{}', dropped {} samples ({:?}) in total",
                state.device.name(),
                state.dropped_samples,
                state.dropped
            );
        }
        state.overflow.clear();
    }

    /// Queues one batch of interleaved samples. Never blocks on the device.
    ///
    /// # Errors
    /// `AudioOutput` if the driver isn't started or the device write fails.
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        let mut state = self.state.write();
        if state.t0.is_none() {
            return Err(AudioscopeError::AudioOutput {
                message: "output driver is not started".to_string(),
            });
        }

        if !state.overflow.is_empty() {
            let pending = std::mem::take(&mut state.overflow);
            let written = state.write_device(&pending)?;
            let consumed = written.min(pending.len());
            state.overflow = pending;
            state.overflow.drain(..consumed);
        }

        if !state.overflow.is_empty() {
            let total = state.overflow.len() + samples.len();
            if total >= self.drop_threshold {
                let lost = state.format.duration_of_samples(total as u64);
                state.dropped += lost;
                state.dropped_samples += total as u64;
                state.overflow.clear();
                log::warn!(
                    "output '{}' can't keep up: dropped {} samples ({:?})",
                    state.device.name(),
                    total,
                    lost
                );
                return Ok(());
            }
            state.overflow.extend_from_slice(samples);
            return Ok(());
        }

        let written = state.write_device(samples)?;
        if written < samples.len() {
            state.overflow.extend_from_slice(&samples[written..]);
        }
        Ok(())
    }

    pub fn time(&self) -> Instant {
        self.state.read().time(self.clock.now())
    }

    pub fn sink_clock(&self) -> SinkClock {
        SinkClock {
            inner: SinkClockInner::Device {
                state: Arc::clone(&self.state),
                clock: Arc::clone(&self.clock),
            },
        }
    }

    /// Total audio discarded by drops.
    pub fn dropped_duration(&self) -> Duration {
        self.state.read().dropped
    }

    pub fn dropped_samples(&self) -> u64 {
        self.state.read().dropped_samples
    }

    /// Samples currently held in the software overflow buffer.
    pub fn overflow_len(&self) -> usize {
        self.state.read().overflow.len()
    }
}

/// Driver used when no output device is configured.
///
/// Its clock is the system clock shifted by a fixed latency, so downstream
/// timestamp arithmetic works the same with or without a physical sink.
#[derive(Clone)]
pub struct NullOutputDriver {
    clock: SharedClock,
    latency: Duration,
}

impl NullOutputDriver {
    pub fn new(clock: SharedClock, latency: Duration) -> Self {
        Self { clock, latency }
    }

    pub fn time(&self) -> Instant {
        self.clock.now() + self.latency
    }
}

/// Every kind of sink the pipe can write to.
pub enum OutputDriver {
    Device(AudioOutputDriver),
    Null(NullOutputDriver),
}

impl OutputDriver {
    pub fn start(&mut self) -> Result<()> {
        match self {
            Self::Device(driver) => driver.start(),
            Self::Null(_) => Ok(()),
        }
    }

    pub fn stop(&mut self) {
        if let Self::Device(driver) = self {
            driver.stop();
        }
    }

    pub fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        match self {
            Self::Device(driver) => driver.write_samples(samples),
            Self::Null(_) => Ok(()),
        }
    }

    pub fn time(&self) -> Instant {
        match self {
            Self::Device(driver) => driver.time(),
            Self::Null(driver) => driver.time(),
        }
    }

    pub fn sink_clock(&self) -> SinkClock {
        match self {
            Self::Device(driver) => driver.sink_clock(),
            Self::Null(driver) => SinkClock {
                inner: SinkClockInner::Null(driver.clone()),
            },
        }
    }
}

#[derive(Clone)]
enum SinkClockInner {
    Device {
        state: Arc<RwLock<OutputState>>,
        clock: SharedClock,
    },
    Null(NullOutputDriver),
}

/// Read-only handle onto a driver's clock, usable from any thread.
#[derive(Clone)]
pub struct SinkClock {
    inner: SinkClockInner,
}

impl SinkClock {
    /// Virtual-clock position of the sample currently being heard.
    pub fn time(&self) -> Instant {
        match &self.inner {
            SinkClockInner::Device { state, clock } => state.read().time(clock.now()),
            SinkClockInner::Null(driver) => driver.time(),
        }
    }

    /// Total audio discarded by drops (always zero without a device).
    pub fn dropped(&self) -> Duration {
        match &self.inner {
            SinkClockInner::Device { state, .. } => state.read().dropped,
            SinkClockInner::Null(_) => Duration::ZERO,
        }
    }
}
