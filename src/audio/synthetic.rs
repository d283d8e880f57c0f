//! Deterministic sources and devices.
//!
//! `SyntheticSource` generates a signal directly as an [`AudioSource`];
//! `SyntheticCapture` and `MemoryRender` stand in for hardware behind the
//! device traits so the clock arithmetic of the real source and output driver
//! can be exercised without a sound card.

use crate::audio::convert::encode_sample;
use crate::audio::device::{CaptureDevice, RenderDevice, RenderDeviceFactory};
use crate::audio::format::AudioFormat;
use crate::audio::source::AudioSource;
use crate::clock::{SharedClock, samples_to_duration, system_clock};
use crate::defaults;
use crate::error::{AudioscopeError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Signal produced by the synthetic source and capture device.
#[derive(Debug, Clone)]
pub enum Waveform {
    Silence,
    Sine { frequency: f32, amplitude: f32 },
    Constant(f32),
    /// Loops over the given mono samples.
    Samples(Arc<[f32]>),
}

impl Waveform {
    /// Value of the frame at `index` (every channel gets the same value).
    pub fn sample(&self, index: u64, sample_rate: u32) -> f32 {
        match self {
            Self::Silence => 0.0,
            Self::Sine {
                frequency,
                amplitude,
            } => {
                let t = index as f64 / sample_rate.max(1) as f64;
                (*amplitude as f64 * (2.0 * std::f64::consts::PI * *frequency as f64 * t).sin())
                    as f32
            }
            Self::Constant(v) => *v,
            Self::Samples(samples) => {
                if samples.is_empty() {
                    0.0
                } else {
                    samples[(index % samples.len() as u64) as usize]
                }
            }
        }
    }
}

/// Generated f32 input.
///
/// Timestamps are exact: the n-th batch is stamped `t0 + frames_emitted / rate`.
/// When paced, each read sleeps until the batch would have been captured, but
/// never longer than one batch, so a clock that doesn't advance can't stall it.
pub struct SyntheticSource {
    name: String,
    format: AudioFormat,
    waveform: Waveform,
    frames_per_read: usize,
    max_reads: Option<u64>,
    fail_after: Option<u64>,
    paced: bool,
    clock: SharedClock,
    t0: Option<Instant>,
    frames_emitted: u64,
    reads: u64,
    polls: u64,
}

impl SyntheticSource {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            name: "synthetic".to_string(),
            format: AudioFormat::float32(sample_rate, channels),
            waveform: Waveform::Silence,
            frames_per_read: defaults::PERIOD_FRAMES as usize,
            max_reads: None,
            fail_after: None,
            paced: true,
            clock: system_clock(),
            t0: None,
            frames_emitted: 0,
            reads: 0,
            polls: 0,
        }
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    pub fn with_frames_per_read(mut self, frames: usize) -> Self {
        self.frames_per_read = frames.max(1);
        self
    }

    /// After `reads` batches every read returns an empty batch.
    pub fn with_max_reads(mut self, reads: u64) -> Self {
        self.max_reads = Some(reads);
        self
    }

    /// After `reads` batches the next read fails.
    pub fn with_read_failure_after(mut self, reads: u64) -> Self {
        self.fail_after = Some(reads);
        self
    }

    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of batches produced since the last start.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Calls to `read_samples` since the last start, including empty ones.
    pub fn polls(&self) -> u64 {
        self.polls
    }
}

impl AudioSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        self.format.validate()?;
        if self.t0.is_none() {
            self.t0 = Some(self.clock.now());
            self.frames_emitted = 0;
            self.reads = 0;
            self.polls = 0;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.t0 = None;
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.t0.is_some()
    }

    fn read_samples(&mut self, dest: &mut Vec<f32>) -> Result<Instant> {
        let t0 = self.t0.ok_or_else(|| AudioscopeError::AudioCapture {
            message: format!("source '{}' is not started", self.name),
        })?;
        let rate = self.format.sample_rate;
        let timestamp = t0 + samples_to_duration(self.frames_emitted, rate);
        self.polls += 1;

        if self.fail_after.is_some_and(|n| self.reads >= n) {
            return Err(AudioscopeError::AudioCapture {
                message: format!("source '{}' failed after {} reads", self.name, self.reads),
            });
        }
        if self.max_reads.is_some_and(|n| self.reads >= n) {
            dest.clear();
            return Ok(timestamp);
        }

        if self.paced {
            let batch = samples_to_duration(self.frames_per_read as u64, rate);
            let due = timestamp + batch;
            let now = self.clock.now();
            if due > now {
                std::thread::sleep((due - now).min(batch));
            }
        }

        let channels = self.format.channel_count as usize;
        dest.clear();
        dest.reserve(self.frames_per_read * channels);
        for i in 0..self.frames_per_read as u64 {
            let value = self.waveform.sample(self.frames_emitted + i, rate);
            dest.extend(std::iter::repeat_n(value, channels));
        }
        self.frames_emitted += self.frames_per_read as u64;
        self.reads += 1;
        Ok(timestamp)
    }
}

/// Capture device producing one period per read in any supported PCM layout.
///
/// The device reports one period as already captured and queued ahead of the
/// reader, so the k-th read is stamped exactly `t0 + k * period`.
pub struct SyntheticCapture {
    name: String,
    format: AudioFormat,
    period_frames: usize,
    waveform: Waveform,
    reads_limit: Option<u64>,
    fail_read_after: Option<u64>,
    fail_open: bool,
    open: bool,
    reads_done: u64,
    frame_cursor: u64,
    encoded: Vec<u8>,
}

impl SyntheticCapture {
    pub fn new(format: AudioFormat, period_frames: usize) -> Self {
        Self {
            name: "synthetic-capture".to_string(),
            format,
            period_frames: period_frames.max(1),
            waveform: Waveform::Silence,
            reads_limit: None,
            fail_read_after: None,
            fail_open: false,
            open: false,
            reads_done: 0,
            frame_cursor: 0,
            encoded: Vec::new(),
        }
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    /// Number of periods delivered before the device runs dry.
    pub fn with_reads(mut self, reads: u64) -> Self {
        self.reads_limit = Some(reads);
        self
    }

    /// The read after `reads` successful ones returns an I/O error.
    pub fn with_read_failure_after(mut self, reads: u64) -> Self {
        self.fail_read_after = Some(reads);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    fn exhausted(&self) -> bool {
        self.reads_limit.is_some_and(|n| self.reads_done >= n)
    }
}

impl CaptureDevice for SyntheticCapture {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(AudioscopeError::AudioCapture {
                message: format!("failed to open '{}'", self.name),
            });
        }
        if !self.open {
            self.open = true;
            self.reads_done = 0;
            self.frame_cursor = 0;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_read_after.is_some_and(|n| self.reads_done >= n) {
            return Err(io::Error::other("synthetic capture failure"));
        }
        if !self.open || self.exhausted() {
            return Ok(0);
        }
        let frame_bytes = self.format.bytes_per_frame().max(1);
        let frames = (buf.len() / frame_bytes).min(self.period_frames);

        self.encoded.clear();
        for i in 0..frames as u64 {
            let value = self
                .waveform
                .sample(self.frame_cursor + i, self.format.sample_rate);
            for _ in 0..self.format.channel_count {
                encode_sample(value, &self.format, &mut self.encoded);
            }
        }
        let n = self.encoded.len().min(buf.len());
        buf[..n].copy_from_slice(&self.encoded[..n]);
        self.frame_cursor += frames as u64;
        self.reads_done += 1;
        Ok(n)
    }

    fn bytes_ready(&self) -> usize {
        if !self.open || self.exhausted() {
            0
        } else {
            self.period_size()
        }
    }

    fn wait_for_ready_read(&mut self, _timeout: Duration) -> bool {
        self.bytes_ready() > 0
    }

    fn processed_time(&self) -> Duration {
        if !self.open {
            return Duration::ZERO;
        }
        let ahead = if self.exhausted() {
            0
        } else {
            self.period_frames as u64
        };
        samples_to_duration(self.frame_cursor + ahead, self.format.sample_rate)
    }

    fn buffer_size(&self) -> usize {
        self.period_size()
    }

    fn period_size(&self) -> usize {
        self.period_frames * self.format.bytes_per_frame()
    }
}

#[derive(Debug)]
struct RenderState {
    open: bool,
    queued: VecDeque<u8>,
    capacity: usize,
    played_frames: u64,
    accepted_samples: u64,
    autoplay: bool,
    fail_writes: bool,
}

/// In-memory render device whose playback is advanced by hand.
///
/// Written bytes sit in a bounded queue until [`MemoryRenderProbe::play`]
/// consumes them, or immediately when autoplay is on.
pub struct MemoryRender {
    format: AudioFormat,
    state: Arc<Mutex<RenderState>>,
}

/// Test-side handle onto a [`MemoryRender`].
#[derive(Debug, Clone)]
pub struct MemoryRenderProbe {
    format: AudioFormat,
    state: Arc<Mutex<RenderState>>,
}

impl MemoryRender {
    /// Creates a device and its probe. `buffer_bytes` is the device buffer capacity.
    pub fn new(format: AudioFormat, buffer_bytes: usize) -> (Self, MemoryRenderProbe) {
        let state = Arc::new(Mutex::new(RenderState {
            open: false,
            queued: VecDeque::with_capacity(buffer_bytes),
            capacity: buffer_bytes,
            played_frames: 0,
            accepted_samples: 0,
            autoplay: false,
            fail_writes: false,
        }));
        let probe = MemoryRenderProbe {
            format,
            state: Arc::clone(&state),
        };
        (Self { format, state }, probe)
    }
}

impl RenderDevice for MemoryRender {
    fn name(&self) -> &str {
        "memory-render"
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            state.open = true;
            state.queued.clear();
            state.played_frames = 0;
        }
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.open = false;
        state.queued.clear();
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let frame_bytes = self.format.bytes_per_frame().max(1);
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(io::Error::other("memory render write failure"));
        }
        if !state.open {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "render device is not open",
            ));
        }
        let free = state.capacity.saturating_sub(state.queued.len());
        let accepted = (buf.len().min(free) / frame_bytes) * frame_bytes;
        state.queued.extend(&buf[..accepted]);
        state.accepted_samples += (accepted / self.format.bytes_per_sample().max(1)) as u64;
        if state.autoplay {
            let frames = (state.queued.len() / frame_bytes) as u64;
            state.queued.clear();
            state.played_frames += frames;
        }
        Ok(accepted)
    }

    fn processed_time(&self) -> Duration {
        samples_to_duration(self.state.lock().played_frames, self.format.sample_rate)
    }

    fn buffer_size(&self) -> usize {
        self.state.lock().capacity
    }
}

impl MemoryRenderProbe {
    /// Plays up to `frames` queued frames, returning how many were played.
    pub fn play(&self, frames: u64) -> u64 {
        let frame_bytes = self.format.bytes_per_frame().max(1);
        let mut state = self.state.lock();
        let available = (state.queued.len() / frame_bytes) as u64;
        let played = frames.min(available);
        state.queued.drain(..played as usize * frame_bytes);
        state.played_frames += played;
        played
    }

    pub fn set_autoplay(&self, autoplay: bool) {
        self.state.lock().autoplay = autoplay;
    }

    pub fn set_write_failure(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn queued_bytes(&self) -> usize {
        self.state.lock().queued.len()
    }

    pub fn played_frames(&self) -> u64 {
        self.state.lock().played_frames
    }

    /// Interleaved samples accepted by the device since it was created.
    pub fn accepted_samples(&self) -> u64 {
        self.state.lock().accepted_samples
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

/// Factory for [`MemoryRender`] devices. Keeps the probe of the last device opened.
#[derive(Debug, Default)]
pub struct MemoryRenderFactory {
    autoplay: bool,
    reject: bool,
    last: Mutex<Option<MemoryRenderProbe>>,
}

impl MemoryRenderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices play everything as soon as it is written.
    pub fn autoplay(mut self) -> Self {
        self.autoplay = true;
        self
    }

    /// Every format is rejected, like a sink that can't play float audio.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn last_probe(&self) -> Option<MemoryRenderProbe> {
        self.last.lock().clone()
    }
}

impl RenderDeviceFactory for MemoryRenderFactory {
    fn name(&self) -> String {
        "memory-render".to_string()
    }

    fn open_render(
        &self,
        format: &AudioFormat,
        buffer_bytes: usize,
    ) -> Result<Box<dyn RenderDevice>> {
        if self.reject {
            return Err(AudioscopeError::configuration(format!(
                "format not supported by sink: {}",
                format
            )));
        }
        let (device, probe) = MemoryRender::new(*format, buffer_bytes);
        probe.set_autoplay(self.autoplay);
        *self.last.lock() = Some(probe);
        Ok(Box::new(device))
    }
}
