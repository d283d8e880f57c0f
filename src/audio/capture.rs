//! Capture and render devices backed by CPAL (Cross-Platform Audio Library).
//!
//! CPAL delivers audio through callbacks on its own thread. The devices here
//! bridge those callbacks onto the blocking byte-oriented [`CaptureDevice`]
//! and [`RenderDevice`] traits with a small ring buffer and a frame counter,
//! which is what the timestamping in the source and output driver needs.

use crate::audio::device::{CaptureDevice, RenderDevice, RenderDeviceFactory};
use crate::audio::format::{AudioFormat, SampleType};
use crate::clock::samples_to_duration;
use crate::error::{AudioscopeError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Periods of headroom kept in the capture ring before the oldest audio is overwritten.
const CAPTURE_RING_PERIODS: usize = 8;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Keep JACK and PipeWire quiet while CPAL probes backends.
///
/// # Safety
/// Modifies environment variables; call at startup before any threads are spawned.
pub fn suppress_audio_warnings() {
    // SAFETY: called from main before the engine spawns threads
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns hidden from listings (per-speaker ALSA plugs, digital outs).
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> Option<String> {
    device.name().ok()
}

/// Which side of the audio host a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

impl DeviceKind {
    fn label(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

fn enumerate(host: &cpal::Host, kind: DeviceKind) -> Result<Vec<cpal::Device>> {
    let devices: Vec<cpal::Device> = match kind {
        DeviceKind::Input => host
            .input_devices()
            .map_err(|e| AudioscopeError::AudioCapture {
                message: format!("Failed to enumerate input devices: {}", e),
            })?
            .collect(),
        DeviceKind::Output => host
            .output_devices()
            .map_err(|e| AudioscopeError::AudioOutput {
                message: format!("Failed to enumerate output devices: {}", e),
            })?
            .collect(),
    };
    Ok(devices)
}

/// List devices of one kind, filtered, with preferred ones marked "\[recommended\]".
///
/// # Errors
/// Returns `AudioCapture`/`AudioOutput` if enumeration fails.
pub fn list_devices(kind: DeviceKind) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| enumerate(&cpal::default_host(), kind))?;

    let mut names = Vec::new();
    for device in devices {
        let Some(name) = device_name(&device) else {
            continue;
        };
        if should_filter_device(&name) {
            continue;
        }
        if is_preferred_device(&name) {
            names.push(format!("{} [recommended]", name));
        } else {
            names.push(name);
        }
    }
    Ok(names)
}

/// Find a device by exact name, or the best default (PipeWire, then Pulse, then system default).
fn find_device(kind: DeviceKind, name: Option<&str>) -> Result<(cpal::Device, String)> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = enumerate(&host, kind)?;

        if let Some(wanted) = name {
            return devices
                .into_iter()
                .find(|d| device_name(d).as_deref() == Some(wanted))
                .map(|d| (d, wanted.to_string()))
                .ok_or_else(|| AudioscopeError::AudioDeviceNotFound {
                    device: wanted.to_string(),
                });
        }

        for device in devices {
            if let Some(name) = device_name(&device)
                && is_preferred_device(&name)
            {
                return Ok((device, name));
            }
        }

        let default = match kind {
            DeviceKind::Input => host.default_input_device(),
            DeviceKind::Output => host.default_output_device(),
        };
        default
            .map(|d| {
                let name = device_name(&d).unwrap_or_else(|| "default".to_string());
                (d, name)
            })
            .ok_or_else(|| AudioscopeError::AudioDeviceNotFound {
                device: format!("default {}", kind.label()),
            })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only created, paused and dropped by the thread that
/// currently owns the device, behind a Mutex; CPAL drives its callbacks on
/// its own thread.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Sample types the capture callback knows how to serialize.
trait LeBytes: cpal::SizedSample + Send + 'static {
    fn push_le(self, out: &mut VecDeque<u8>);
}

macro_rules! impl_le_bytes {
    ($($t:ty),*) => {
        $(impl LeBytes for $t {
            fn push_le(self, out: &mut VecDeque<u8>) {
                out.extend(self.to_le_bytes());
            }
        })*
    };
}

impl_le_bytes!(i16, u16, i32, u32, f32);

struct CaptureShared {
    ring: Mutex<VecDeque<u8>>,
    ready: Condvar,
    captured_frames: AtomicU64,
    overruns: AtomicU64,
    capacity: usize,
    frame_bytes: usize,
}

impl CaptureShared {
    fn push<T: LeBytes>(&self, data: &[T], channels: usize) {
        let mut ring = self.ring.lock();
        for &sample in data {
            sample.push_le(&mut ring);
        }
        if ring.len() > self.capacity {
            let excess = ring.len() - self.capacity;
            let cut = (excess.div_ceil(self.frame_bytes) * self.frame_bytes).min(ring.len());
            ring.drain(..cut);
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        self.captured_frames
            .fetch_add((data.len() / channels.max(1)) as u64, Ordering::Relaxed);
        drop(ring);
        self.ready.notify_one();
    }

    /// Moves up to `buf.len()` bytes out of the ring.
    fn pop(&self, buf: &mut [u8]) -> usize {
        let mut ring = self.ring.lock();
        let n = buf.len().min(ring.len());
        for (dst, src) in buf.iter_mut().zip(ring.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Frame index of the oldest unread frame, taken under the ring lock so
    /// the counter and the ring length agree.
    fn oldest_unread_frame(&self) -> u64 {
        let ring = self.ring.lock();
        let queued = (ring.len() / self.frame_bytes.max(1)) as u64;
        self.captured_frames
            .load(Ordering::Relaxed)
            .saturating_sub(queued)
    }
}

/// Capture device on a CPAL input stream with a fixed, negotiated format.
pub struct CpalCaptureDevice {
    name: String,
    device: cpal::Device,
    format: AudioFormat,
    period_frames: usize,
    shared: Arc<CaptureShared>,
    stream: Option<SendableStream>,
}

impl CpalCaptureDevice {
    /// Select an input device (by name, or the best default) for the given format.
    ///
    /// # Errors
    /// - `AudioDeviceNotFound` if no matching device exists
    /// - `UnsupportedFormat` if the format has no CPAL counterpart
    pub fn new(device_name: Option<&str>, format: AudioFormat, period_frames: usize) -> Result<Self> {
        cpal_sample_format(&format)?;
        let (device, name) = find_device(DeviceKind::Input, device_name)?;
        let period_frames = period_frames.max(1);
        let frame_bytes = format.bytes_per_frame().max(1);
        Ok(Self {
            name,
            device,
            format,
            period_frames,
            shared: Arc::new(CaptureShared {
                ring: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
                captured_frames: AtomicU64::new(0),
                overruns: AtomicU64::new(0),
                capacity: period_frames * frame_bytes * CAPTURE_RING_PERIODS,
                frame_bytes,
            }),
            stream: None,
        })
    }

    /// Number of callbacks that overflowed the capture ring.
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    fn build_stream<T: LeBytes>(&self, config: &cpal::StreamConfig) -> Result<cpal::Stream> {
        let shared = Arc::clone(&self.shared);
        let channels = config.channels as usize;
        self.device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| shared.push(data, channels),
                |err| log::error!("Audio input stream error: {}", err),
                None,
            )
            .map_err(|e| AudioscopeError::AudioCapture {
                message: format!("Failed to build input stream: {}", e),
            })
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.shared.ring.lock().clear();
        self.shared.captured_frames.store(0, Ordering::Relaxed);

        let config = stream_config(&self.format, self.period_frames);
        let stream = match cpal_sample_format(&self.format)? {
            cpal::SampleFormat::I16 => self.build_stream::<i16>(&config)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(&config)?,
            cpal::SampleFormat::I32 => self.build_stream::<i32>(&config)?,
            cpal::SampleFormat::U32 => self.build_stream::<u32>(&config)?,
            _ => self.build_stream::<f32>(&config)?,
        };
        stream.play().map_err(|e| AudioscopeError::AudioCapture {
            message: format!("Failed to start input stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        log::info!("opened input device '{}' ({})", self.name, self.format);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take()
            && let Err(e) = stream.0.pause()
        {
            log::warn!("failed to pause input stream '{}': {}", self.name, e);
        }
        self.shared.ring.lock().clear();
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.shared.pop(buf))
    }

    fn bytes_ready(&self) -> usize {
        self.shared.ring.lock().len()
    }

    fn wait_for_ready_read(&mut self, timeout: Duration) -> bool {
        let mut ring = self.shared.ring.lock();
        if ring.is_empty() {
            self.shared.ready.wait_for(&mut ring, timeout);
        }
        !ring.is_empty()
    }

    fn processed_time(&self) -> Duration {
        samples_to_duration(
            self.shared.captured_frames.load(Ordering::Relaxed),
            self.format.sample_rate,
        )
    }

    fn unread_position(&self) -> Duration {
        samples_to_duration(self.shared.oldest_unread_frame(), self.format.sample_rate)
    }

    /// One period: the audio a callback delivers before it becomes readable.
    fn buffer_size(&self) -> usize {
        self.period_size()
    }

    fn period_size(&self) -> usize {
        self.period_frames * self.format.bytes_per_frame()
    }
}

struct RenderShared {
    ring: Mutex<VecDeque<f32>>,
    capacity: usize,
    played_frames: AtomicU64,
}

/// Render device on a CPAL f32 output stream.
///
/// Written samples queue in a ring of `buffer_bytes`; the output callback
/// drains it and plays silence on underrun. Only samples actually taken from
/// the ring count as processed.
pub struct CpalRenderDevice {
    name: String,
    device: Mutex<cpal::Device>,
    format: AudioFormat,
    shared: Arc<RenderShared>,
    stream: Mutex<Option<SendableStream>>,
}

impl RenderDevice for CpalRenderDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open(&mut self) -> Result<()> {
        let mut stream_guard = self.stream.lock();
        if stream_guard.is_some() {
            return Ok(());
        }
        self.shared.ring.lock().clear();
        self.shared.played_frames.store(0, Ordering::Relaxed);

        let config = stream_config(&self.format, 0);
        let channels = self.format.channel_count.max(1) as u64;
        let shared = Arc::clone(&self.shared);
        let stream = self
            .device
            .lock()
            .build_output_stream(
                &config,
                move |output: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut ring = shared.ring.lock();
                    let mut taken = 0u64;
                    for slot in output.iter_mut() {
                        match ring.pop_front() {
                            Some(sample) => {
                                *slot = sample;
                                taken += 1;
                            }
                            None => *slot = 0.0,
                        }
                    }
                    shared
                        .played_frames
                        .fetch_add(taken / channels, Ordering::Relaxed);
                },
                |err| log::error!("Audio output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioscopeError::AudioOutput {
                message: format!("Failed to build output stream: {}", e),
            })?;
        stream.play().map_err(|e| AudioscopeError::AudioOutput {
            message: format!("Failed to start output stream: {}", e),
        })?;
        *stream_guard = Some(SendableStream(stream));
        log::info!("opened output device '{}' ({})", self.name, self.format);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.lock().take()
            && let Err(e) = stream.0.pause()
        {
            log::warn!("failed to pause output stream '{}': {}", self.name, e);
        }
        self.shared.ring.lock().clear();
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let channels = self.format.channel_count.max(1) as usize;
        let mut ring = self.shared.ring.lock();
        let free = self.shared.capacity.saturating_sub(ring.len());
        let samples = ((buf.len() / 4).min(free) / channels) * channels;
        ring.extend(
            buf[..samples * 4]
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        Ok(samples * 4)
    }

    fn processed_time(&self) -> Duration {
        samples_to_duration(
            self.shared.played_frames.load(Ordering::Relaxed),
            self.format.sample_rate,
        )
    }

    fn buffer_size(&self) -> usize {
        self.shared.capacity * 4
    }
}

/// Output device selection; opens [`CpalRenderDevice`]s after checking the format.
pub struct CpalOutputDevice {
    name: String,
    device: Mutex<cpal::Device>,
}

impl CpalOutputDevice {
    /// Select an output device by name, or the best default.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let (device, name) = find_device(DeviceKind::Output, device_name)?;
        Ok(Self {
            name,
            device: Mutex::new(device),
        })
    }

    fn supports(&self, format: &AudioFormat) -> bool {
        let Ok(format_tag) = cpal_sample_format(format) else {
            return false;
        };
        let device = self.device.lock();
        let Ok(ranges) = with_suppressed_stderr(|| device.supported_output_configs()) else {
            return false;
        };
        ranges.into_iter().any(|range| {
            range.channels() == format.channel_count
                && range.sample_format() == format_tag
                && range.min_sample_rate() <= format.sample_rate
                && format.sample_rate <= range.max_sample_rate()
        })
    }
}

impl RenderDeviceFactory for CpalOutputDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open_render(
        &self,
        format: &AudioFormat,
        buffer_bytes: usize,
    ) -> Result<Box<dyn RenderDevice>> {
        if !self.supports(format) {
            return Err(AudioscopeError::configuration(format!(
                "format not supported by sink '{}': {}",
                self.name, format
            )));
        }
        let channels = format.channel_count.max(1) as usize;
        let capacity = ((buffer_bytes / 4) / channels).max(1) * channels;
        Ok(Box::new(CpalRenderDevice {
            name: self.name.clone(),
            device: Mutex::new(self.device.lock().clone()),
            format: *format,
            shared: Arc::new(RenderShared {
                ring: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                played_frames: AtomicU64::new(0),
            }),
            stream: Mutex::new(None),
        }))
    }
}

fn cpal_sample_format(format: &AudioFormat) -> Result<cpal::SampleFormat> {
    match (format.sample_type, format.bits) {
        (SampleType::SignedInt, 16) => Ok(cpal::SampleFormat::I16),
        (SampleType::UnsignedInt, 16) => Ok(cpal::SampleFormat::U16),
        (SampleType::SignedInt, 32) => Ok(cpal::SampleFormat::I32),
        (SampleType::UnsignedInt, 32) => Ok(cpal::SampleFormat::U32),
        (SampleType::Float, 32) => Ok(cpal::SampleFormat::F32),
        _ => Err(AudioscopeError::UnsupportedFormat {
            format: format.sample_tag(),
        }),
    }
}

fn stream_config(format: &AudioFormat, period_frames: usize) -> cpal::StreamConfig {
    let buffer_size = match u32::try_from(period_frames) {
        Ok(frames) if frames > 0 => cpal::BufferSize::Fixed(frames),
        _ => cpal::BufferSize::Default,
    };
    cpal::StreamConfig {
        channels: format.channel_count,
        sample_rate: format.sample_rate,
        buffer_size,
    }
}
