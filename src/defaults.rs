//! Default configuration constants for audioscope.
//!
//! Shared by the configuration types, the engine and the processors so the
//! same numbers are not repeated across modules.

use std::time::Duration;

/// Default capture sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48000;

/// Default capture channel count.
pub const CHANNELS: u16 = 1;

/// Default capture sample format.
pub const SAMPLE_FORMAT: &str = "s16";

/// Frames per device period requested from capture devices.
pub const PERIOD_FRAMES: u32 = 1024;

/// Output device buffer length in milliseconds.
pub const OUTPUT_BUFFER_MS: u32 = 100;

/// Software overflow length (in milliseconds of audio) at which the output
/// driver discards everything it has queued.
pub const OUTPUT_DROP_MS: u32 = 500;

/// Latency reported by the null output driver when no sink is configured.
pub const NULL_OUTPUT_LATENCY_MS: u32 = 0;

/// RMS windows per second (a window is `sample_rate / RMS_WINDOWS_PER_SECOND` samples).
pub const RMS_WINDOWS_PER_SECOND: u32 = 10;

/// Number of past RMS values the recent peak is taken over.
pub const RMS_BACKLOG: usize = 32;

/// FFT window size in samples.
pub const FFT_SIZE: usize = 4096;

/// Hop period between successive FFT frames in milliseconds.
pub const FFT_PERIOD_MS: u32 = 25;

/// Capacity of each subscriber's block channel.
pub const CHANNEL_CAPACITY: usize = 64;

/// Capacity of presentation-side timed queues.
pub const QUEUE_CAPACITY: usize = 256;

/// Frames worth of time the pipe sleeps when a read returned nothing.
///
/// 256 frames is about 5 ms at 48 kHz.
pub const IDLE_POLL_FRAMES: u32 = 256;

/// Upper bound on how long a source waits for the device to have data.
pub const READ_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

/// How long `AudioPipe::spawn` waits between checks that the pipe thread is alive.
pub const STARTUP_POLL: Duration = Duration::from_millis(50);
