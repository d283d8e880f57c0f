//! Device seams for capture and render hardware.
//!
//! These traits describe the small surface the pipeline needs from the
//! platform audio API: byte-oriented reads and writes, a buffer size and a
//! processed-time counter. Implementations live in [`crate::audio::capture`]
//! (cpal) and [`crate::audio::synthetic`] (deterministic doubles).

use crate::audio::format::AudioFormat;
use crate::error::Result;
use std::io;
use std::time::Duration;

/// A capture device opened with an already negotiated format.
pub trait CaptureDevice: Send {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Format of the bytes returned by [`read`](Self::read).
    fn format(&self) -> AudioFormat;

    /// Starts the device. Calling it on an open device is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Stops the device and discards anything buffered.
    fn close(&mut self);

    /// Reads up to `buf.len()` bytes of captured PCM without blocking.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Bytes that can be read right now.
    fn bytes_ready(&self) -> usize;

    /// Blocks until data is available or `timeout` expires.
    ///
    /// Returns `true` when data is ready.
    fn wait_for_ready_read(&mut self, timeout: Duration) -> bool;

    /// Amount of audio the device has captured since it was opened.
    fn processed_time(&self) -> Duration;

    /// Capture offset, from open, of the oldest byte not yet read.
    ///
    /// Devices whose counters can move between the two calls should override
    /// this with a consistent snapshot.
    fn unread_position(&self) -> Duration {
        self.processed_time()
            .saturating_sub(self.format().duration_of_bytes(self.bytes_ready()))
    }

    /// Size of the device buffer in bytes.
    fn buffer_size(&self) -> usize;

    /// Size of one device period in bytes.
    fn period_size(&self) -> usize;
}

/// A render device opened with an already negotiated format.
///
/// `Sync` because the output driver reads the processed-time counter from
/// other threads under a shared lock.
pub trait RenderDevice: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Format expected by [`write`](Self::write).
    fn format(&self) -> AudioFormat;

    /// Starts playback. Calling it on an open device is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Stops playback and discards anything buffered.
    fn close(&mut self);

    /// Queues up to `buf.len()` bytes, returning how many were accepted.
    ///
    /// Never blocks; a full device buffer accepts fewer bytes.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Amount of audio the device has played since it was opened.
    fn processed_time(&self) -> Duration;

    /// Size of the device buffer in bytes.
    fn buffer_size(&self) -> usize;
}

/// Opens render devices for a given format.
///
/// This is where (device, format) negotiation happens: an implementation
/// rejects formats the hardware can't play with a configuration error.
pub trait RenderDeviceFactory: Send + Sync {
    /// Name of the device this factory opens.
    fn name(&self) -> String;

    /// Creates an unopened render device with a buffer of `buffer_bytes` bytes.
    fn open_render(&self, format: &AudioFormat, buffer_bytes: usize)
    -> Result<Box<dyn RenderDevice>>;
}
