use crate::audio::convert::{SampleConverter, read_and_convert};
use crate::audio::device::CaptureDevice;
use crate::audio::format::AudioFormat;
use crate::audio::synthetic::SyntheticSource;
use crate::clock::{SharedClock, system_clock};
use crate::defaults;
use crate::error::{AudioscopeError, Result};
use std::time::{Duration, Instant};

/// Capability shared by every input the pipe can read from.
pub trait AudioSource: Send {
    /// Name for logging.
    fn name(&self) -> &str;

    /// Format of the interleaved samples returned by `read_samples`.
    fn format(&self) -> AudioFormat;

    /// Start capturing. Calling it while capturing is a no-op.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing.
    fn stop(&mut self) -> Result<()>;

    /// Whether the source is currently capturing.
    fn is_started(&self) -> bool;

    /// Replace `dest` with the next batch of interleaved normalized samples.
    ///
    /// # Returns
    /// The capture time of the oldest sample in the batch. An empty `dest`
    /// means nothing was ready; an error is unrecoverable.
    fn read_samples(&mut self, dest: &mut Vec<f32>) -> Result<Instant>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Idle,
    Capturing,
}

/// Wraps one capture device and derives a capture-time clock from its counters.
///
/// Capture timestamps are `t0 + processed_time - queued`: the device clock
/// origin, plus what the device has captured so far, minus the audio still
/// waiting to be read. Measuring what is actually queued keeps stamps exact
/// when reads fall behind and the device holds several periods.
pub struct AudioInputSource {
    device: Box<dyn CaptureDevice>,
    format: AudioFormat,
    converter: Option<SampleConverter>,
    clock: SharedClock,
    state: SourceState,
    t0: Option<Instant>,
    buffer_delay: Duration,
    scratch: Vec<u8>,
}

impl AudioInputSource {
    /// Wraps a capture device using the system clock.
    ///
    /// # Errors
    /// Configuration error if the device format can't be decoded.
    pub fn new(device: Box<dyn CaptureDevice>) -> Result<Self> {
        Self::with_clock(device, system_clock())
    }

    /// Wraps a capture device with an injectable clock.
    pub fn with_clock(device: Box<dyn CaptureDevice>, clock: SharedClock) -> Result<Self> {
        let format = device.format();
        format.validate()?;
        let converter = SampleConverter::for_format(format.sample_type, format.bits)?;
        Ok(Self {
            device,
            format,
            converter,
            clock,
            state: SourceState::Idle,
            t0: None,
            buffer_delay: Duration::ZERO,
            scratch: Vec::new(),
        })
    }

    /// Nominal device buffer latency, reported when capture starts.
    pub fn buffer_delay(&self) -> Duration {
        self.buffer_delay
    }

    /// Clock origin set by the last `start()`.
    pub fn origin(&self) -> Option<Instant> {
        self.t0
    }

    fn capture_timestamp(&self, t0: Instant) -> Instant {
        t0 + self.device.unread_position()
    }
}

impl AudioSource for AudioInputSource {
    fn name(&self) -> &str {
        self.device.name()
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        if self.state == SourceState::Capturing {
            return Ok(());
        }
        self.device.open()?;
        self.t0 = Some(self.clock.now());
        self.buffer_delay = self.format.duration_of_bytes(self.device.buffer_size());
        self.state = SourceState::Capturing;
        log::info!(
            "capture started on '{}' ({}), buffer delay {:?}",
            self.device.name(),
            self.format,
            self.buffer_delay
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.state == SourceState::Capturing {
            self.device.close();
            self.state = SourceState::Idle;
            log::info!("capture stopped on '{}'", self.device.name());
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.state == SourceState::Capturing
    }

    fn read_samples(&mut self, dest: &mut Vec<f32>) -> Result<Instant> {
        let t0 = match (self.state, self.t0) {
            (SourceState::Capturing, Some(t0)) => t0,
            _ => {
                return Err(AudioscopeError::AudioCapture {
                    message: format!("source '{}' is not started", self.device.name()),
                });
            }
        };

        if self.device.bytes_ready() == 0
            && !self.device.wait_for_ready_read(defaults::READ_WAIT_TIMEOUT)
        {
            dest.clear();
            return Ok(self.capture_timestamp(t0));
        }

        // Sampled before reading: the oldest byte we are about to read.
        let timestamp = self.capture_timestamp(t0);

        let sample_bytes = self.format.bytes_per_sample();
        let frame_bytes = self.format.bytes_per_frame().max(1);
        let wanted = self
            .device
            .period_size()
            .max(dest.capacity() * sample_bytes);
        let bytes_to_read = (wanted / frame_bytes).max(1) * frame_bytes;

        read_and_convert(
            self.device.as_mut(),
            self.converter,
            bytes_to_read,
            &mut self.scratch,
            dest,
        )
        .map_err(|e| AudioscopeError::AudioCapture {
            message: format!("read from '{}' failed: {}", self.device.name(), e),
        })?;

        Ok(timestamp)
    }
}

/// Every kind of input the engine can own.
pub enum InputSource {
    /// A capture device.
    Device(AudioInputSource),
    /// A generated signal, for tests and demos.
    Synthetic(SyntheticSource),
}

impl From<AudioInputSource> for InputSource {
    fn from(source: AudioInputSource) -> Self {
        Self::Device(source)
    }
}

impl From<SyntheticSource> for InputSource {
    fn from(source: SyntheticSource) -> Self {
        Self::Synthetic(source)
    }
}

impl AudioSource for InputSource {
    fn name(&self) -> &str {
        match self {
            Self::Device(s) => s.name(),
            Self::Synthetic(s) => s.name(),
        }
    }

    fn format(&self) -> AudioFormat {
        match self {
            Self::Device(s) => s.format(),
            Self::Synthetic(s) => s.format(),
        }
    }

    fn start(&mut self) -> Result<()> {
        match self {
            Self::Device(s) => s.start(),
            Self::Synthetic(s) => s.start(),
        }
    }

    fn stop(&mut self) -> Result<()> {
        match self {
            Self::Device(s) => s.stop(),
            Self::Synthetic(s) => s.stop(),
        }
    }

    fn is_started(&self) -> bool {
        match self {
            Self::Device(s) => s.is_started(),
            Self::Synthetic(s) => s.is_started(),
        }
    }

    fn read_samples(&mut self, dest: &mut Vec<f32>) -> Result<Instant> {
        match self {
            Self::Device(s) => s.read_samples(dest),
            Self::Synthetic(s) => s.read_samples(dest),
        }
    }
}
