//! The capture thread: source → mono block → subscribers, and source → sink.

use crate::audio::format::AudioFormat;
use crate::audio::source::{AudioSource, InputSource};
use crate::clock::samples_to_duration;
use crate::defaults;
use crate::error::{AudioscopeError, Result};
use crate::pipeline::output::{OutputDriver, SinkClock};
use crate::pipeline::types::{SampleBlock, SharedBlock};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// How often a full subscriber is reported after its first miss.
const MISS_LOG_INTERVAL: u64 = 100;

struct Subscriber {
    name: String,
    tx: Sender<SharedBlock>,
    missed: u64,
}

/// Fan-out of sample blocks to any number of bounded subscriber channels.
///
/// Publishing never blocks: a subscriber whose channel is full misses that
/// block, and subscribers whose receiver is gone are removed.
#[derive(Clone, Default)]
pub struct Publisher {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber with a channel of `capacity` blocks.
    pub fn subscribe(&self, name: impl Into<String>, capacity: usize) -> Receiver<SharedBlock> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.lock().push(Subscriber {
            name: name.into(),
            tx,
            missed: 0,
        });
        rx
    }

    /// Delivers `block` to every subscriber with room, returning how many got it.
    pub fn publish(&self, block: &SharedBlock) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        subscribers.retain_mut(|sub| match sub.tx.try_send(Arc::clone(block)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                sub.missed += 1;
                if sub.missed == 1 || sub.missed % MISS_LOG_INTERVAL == 0 {
                    log::warn!(
                        "subscriber '{}' is falling behind ({} blocks missed)",
                        sub.name,
                        sub.missed
                    );
                }
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("subscriber '{}' disconnected", sub.name);
                false
            }
        });
        delivered
    }

    /// Drops every sender, so subscribers see their channel disconnect.
    pub fn close(&self) {
        self.subscribers.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Blocks missed by the named subscriber, if it is still subscribed.
    pub fn missed(&self, name: &str) -> Option<u64> {
        self.subscribers
            .lock()
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.missed)
    }
}

/// Folds interleaved frames to mono by summing the channels.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum())
        .collect()
}

/// What happens to the source when a pipe stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDisposition {
    /// Hand the stopped source back to the caller.
    Reclaim,
    /// Destroy the source.
    Release,
}

/// Startup failure; carries the source back when the thread returned it.
pub struct PipeStartError {
    pub error: AudioscopeError,
    pub source: Option<Box<InputSource>>,
}

impl fmt::Debug for PipeStartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeStartError")
            .field("error", &self.error)
            .field("source_returned", &self.source.is_some())
            .finish()
    }
}

impl fmt::Display for PipeStartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audio pipe failed to start: {}", self.error)
    }
}

impl std::error::Error for PipeStartError {}

enum Startup {
    Pending,
    Ready,
    Failed(AudioscopeError),
}

struct PipeShared {
    terminate: AtomicBool,
    startup: Mutex<Startup>,
    started: Condvar,
    fatal: Mutex<Option<String>>,
}

impl PipeShared {
    fn signal(&self, state: Startup) {
        *self.startup.lock() = state;
        self.started.notify_all();
    }
}

/// One run of source and sink on the `audio-pipe` thread.
///
/// The pipe owns both while running. On stop the source comes back to the
/// caller (or is destroyed) and the sink is closed and dropped.
pub struct AudioPipe {
    shared: Arc<PipeShared>,
    handle: Option<JoinHandle<Option<Box<InputSource>>>>,
    sink_clock: SinkClock,
    format: AudioFormat,
}

impl AudioPipe {
    /// Starts source then sink on a new thread and waits until both are open.
    ///
    /// # Errors
    /// If either fails to start, the thread exits and the error is returned
    /// together with the source.
    pub fn spawn(
        source: Box<InputSource>,
        sink: OutputDriver,
        publisher: Publisher,
    ) -> std::result::Result<Self, PipeStartError> {
        let shared = Arc::new(PipeShared {
            terminate: AtomicBool::new(false),
            startup: Mutex::new(Startup::Pending),
            started: Condvar::new(),
            fatal: Mutex::new(None),
        });
        let sink_clock = sink.sink_clock();
        let format = source.format();

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("audio-pipe".to_string())
            .spawn(move || run_pipe(source, sink, publisher, thread_shared))
            .map_err(|e| PipeStartError {
                error: AudioscopeError::Other(format!("failed to spawn audio pipe: {}", e)),
                source: None,
            })?;

        let outcome = {
            let mut startup = shared.startup.lock();
            while matches!(*startup, Startup::Pending) && !handle.is_finished() {
                shared
                    .started
                    .wait_for(&mut startup, defaults::STARTUP_POLL);
            }
            std::mem::replace(&mut *startup, Startup::Pending)
        };

        match outcome {
            Startup::Ready => Ok(Self {
                shared,
                handle: Some(handle),
                sink_clock,
                format,
            }),
            Startup::Failed(error) => Err(PipeStartError {
                error,
                source: handle.join().ok().flatten(),
            }),
            Startup::Pending => {
                if let Err(panic_info) = handle.join() {
                    log::error!("audio pipe thread panicked: {}", panic_message(&*panic_info));
                }
                Err(PipeStartError {
                    error: AudioscopeError::Other(
                        "audio pipe exited before signalling startup".to_string(),
                    ),
                    source: None,
                })
            }
        }
    }

    /// Requests termination and waits for the thread to exit.
    ///
    /// Returns `None` when the pipe was already stopped, when the source was
    /// lost to a fatal error, or for [`SourceDisposition::Release`].
    pub fn stop(&mut self, disposition: SourceDisposition) -> Option<Box<InputSource>> {
        let handle = self.handle.take()?;
        self.shared.terminate.store(true, Ordering::Release);
        match handle.join() {
            Ok(source) => match disposition {
                SourceDisposition::Reclaim => source,
                SourceDisposition::Release => None,
            },
            Err(panic_info) => {
                log::error!("audio pipe thread panicked: {}", panic_message(&*panic_info));
                None
            }
        }
    }

    /// Whether the pipe thread is still looping.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Sink clock position, readable from any thread.
    pub fn sink_time(&self) -> Instant {
        self.sink_clock.time()
    }

    pub fn sink_clock(&self) -> SinkClock {
        self.sink_clock.clone()
    }

    /// Format of the source this pipe reads.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Error that ended the pipe, if any.
    pub fn fatal_error(&self) -> Option<String> {
        self.shared.fatal.lock().clone()
    }
}

impl Drop for AudioPipe {
    fn drop(&mut self) {
        self.stop(SourceDisposition::Release);
    }
}

fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> &str {
    panic_info
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

fn run_pipe(
    mut source: Box<InputSource>,
    mut sink: OutputDriver,
    publisher: Publisher,
    shared: Arc<PipeShared>,
) -> Option<Box<InputSource>> {
    if let Err(e) = source.start() {
        shared.signal(Startup::Failed(e));
        return Some(source);
    }
    if let Err(e) = sink.start() {
        if let Err(stop_err) = source.stop() {
            log::warn!("failed to stop source '{}': {}", source.name(), stop_err);
        }
        shared.signal(Startup::Failed(e));
        return Some(source);
    }
    shared.signal(Startup::Ready);
    log::info!("audio pipe running on '{}' ({})", source.name(), source.format());

    let result = pump(&mut source, &mut sink, &publisher, &shared);
    sink.stop();
    if let Err(e) = source.stop() {
        log::warn!("failed to stop source '{}': {}", source.name(), e);
    }

    match result {
        Ok(blocks) => {
            log::info!("audio pipe stopped after {} blocks", blocks);
            Some(source)
        }
        Err(e) => {
            log::error!("audio pipe stopped on fatal error: {}", e);
            *shared.fatal.lock() = Some(e.to_string());
            None
        }
    }
}

/// Read → downmix → publish → render until termination is requested.
fn pump(
    source: &mut InputSource,
    sink: &mut OutputDriver,
    publisher: &Publisher,
    shared: &PipeShared,
) -> Result<u64> {
    let format = source.format();
    let channels = format.channel_count.max(1) as usize;
    let idle = samples_to_duration(defaults::IDLE_POLL_FRAMES as u64, format.sample_rate);
    let mut scratch: Vec<f32> = Vec::new();
    let mut blocks = 0u64;

    while !shared.terminate.load(Ordering::Acquire) {
        let timestamp = source.read_samples(&mut scratch)?;
        if scratch.is_empty() {
            thread::sleep(idle);
            continue;
        }

        let capacity = scratch.capacity();
        let original_samples = std::mem::replace(&mut scratch, Vec::with_capacity(capacity));
        let block: SharedBlock = Arc::new(SampleBlock {
            timestamp,
            sample_rate: format.sample_rate,
            channel_count: format.channel_count,
            mono_samples: downmix(&original_samples, channels),
            original_samples,
        });

        publisher.publish(&block);
        sink.write_samples(&block.original_samples)?;
        blocks += 1;
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleType;
    use crate::audio::source::AudioInputSource;
    use crate::audio::synthetic::{MemoryRender, SyntheticCapture, SyntheticSource, Waveform};
    use crate::clock::{ManualClock, system_clock};
    use crate::pipeline::output::{AudioOutputDriver, NullOutputDriver};
    use std::time::Duration;

    fn null_sink() -> OutputDriver {
        OutputDriver::Null(NullOutputDriver::new(system_clock(), Duration::ZERO))
    }

    fn synthetic(reads: u64) -> Box<InputSource> {
        Box::new(InputSource::Synthetic(
            SyntheticSource::new(8000, 1)
                .with_frames_per_read(800)
                .with_max_reads(reads)
                .paced(false),
        ))
    }

    fn block_at(t: Instant) -> SharedBlock {
        Arc::new(SampleBlock {
            timestamp: t,
            sample_rate: 8000,
            channel_count: 1,
            mono_samples: vec![0.0; 8],
            original_samples: vec![0.0; 8],
        })
    }

    #[test]
    fn test_downmix_sums_channels() {
        assert_eq!(downmix(&[0.25, 0.5, -1.0, 1.0], 2), vec![0.75, 0.0]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_publisher_full_subscriber_misses_block() {
        let publisher = Publisher::new();
        let fast = publisher.subscribe("fast", 4);
        let _slow = publisher.subscribe("slow", 1);

        let now = Instant::now();
        assert_eq!(publisher.publish(&block_at(now)), 2);
        assert_eq!(publisher.publish(&block_at(now)), 1);
        assert_eq!(publisher.missed("slow"), Some(1));
        assert_eq!(publisher.missed("fast"), Some(0));
        assert_eq!(fast.len(), 2);
    }

    #[test]
    fn test_publisher_prunes_disconnected_subscribers() {
        let publisher = Publisher::new();
        let rx = publisher.subscribe("gone", 4);
        let _kept = publisher.subscribe("kept", 4);
        drop(rx);

        publisher.publish(&block_at(Instant::now()));
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.close();
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn test_pipe_publishes_every_read_and_returns_source() {
        let publisher = Publisher::new();
        let rx = publisher.subscribe("test", 16);
        let mut pipe = AudioPipe::spawn(synthetic(5), null_sink(), publisher).unwrap();

        let blocks: Vec<SharedBlock> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::from_millis(100));
        }
        assert!(blocks.iter().all(|b| b.frames() == 800));

        let source = pipe.stop(SourceDisposition::Reclaim).unwrap();
        assert!(!source.is_started());
        assert!(pipe.stop(SourceDisposition::Reclaim).is_none());
        assert!(pipe.fatal_error().is_none());
    }

    #[test]
    fn test_empty_source_is_polled_at_a_bounded_rate() {
        let publisher = Publisher::new();
        let rx = publisher.subscribe("test", 4);
        let started = Instant::now();
        let mut pipe = AudioPipe::spawn(synthetic(0), null_sink(), publisher).unwrap();
        thread::sleep(Duration::from_millis(200));
        let source = pipe.stop(SourceDisposition::Reclaim).unwrap();
        let elapsed = started.elapsed();

        let InputSource::Synthetic(source) = *source else {
            panic!("expected the synthetic source back");
        };
        // 256 frames at 8 kHz: one poll per 32 ms at most.
        let idle = samples_to_duration(defaults::IDLE_POLL_FRAMES as u64, 8000);
        let max_polls = (elapsed.as_nanos() / idle.as_nanos()) as u64 + 1;
        assert!(source.polls() >= 1);
        assert!(
            source.polls() <= max_polls,
            "{} polls in {:?}",
            source.polls(),
            elapsed
        );
        assert!(rx.is_empty());
    }

    #[test]
    fn test_stereo_blocks_keep_interleaved_original() {
        let publisher = Publisher::new();
        let rx = publisher.subscribe("test", 4);
        let source = SyntheticSource::new(8000, 2)
            .with_waveform(Waveform::Constant(0.25))
            .with_frames_per_read(10)
            .with_max_reads(1)
            .paced(false);
        let mut pipe =
            AudioPipe::spawn(Box::new(source.into()), null_sink(), publisher).unwrap();

        let block = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(block.channel_count, 2);
        assert_eq!(block.original_samples.len(), 20);
        assert_eq!(block.mono_samples, vec![0.5; 10]);
        pipe.stop(SourceDisposition::Release);
    }

    #[test]
    fn test_sink_receives_original_samples() {
        let (device, probe) = MemoryRender::new(AudioFormat::float32(8000, 1), 1 << 20);
        probe.set_autoplay(true);
        let sink = OutputDriver::Device(AudioOutputDriver::new(
            Box::new(device),
            500,
            system_clock(),
        ));
        let publisher = Publisher::new();
        let rx = publisher.subscribe("test", 16);
        let mut pipe = AudioPipe::spawn(synthetic(3), sink, publisher).unwrap();

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        pipe.stop(SourceDisposition::Release);
        assert_eq!(probe.accepted_samples(), 2400);
        assert!(!probe.is_open());
    }

    #[test]
    fn test_startup_failure_returns_source() {
        let format = AudioFormat::new(8000, 1, SampleType::SignedInt, 16);
        let device = SyntheticCapture::new(format, 80).failing_open();
        let source = AudioInputSource::with_clock(Box::new(device), ManualClock::new().shared())
            .unwrap();

        let err = AudioPipe::spawn(Box::new(source.into()), null_sink(), Publisher::new())
            .err()
            .unwrap();
        assert!(matches!(err.error, AudioscopeError::AudioCapture { .. }));
        let source = err.source.unwrap();
        assert!(!source.is_started());
    }

    #[test]
    fn test_fatal_read_ends_pipe_and_loses_source() {
        let source = SyntheticSource::new(8000, 1)
            .with_frames_per_read(80)
            .with_read_failure_after(2)
            .paced(false);
        let publisher = Publisher::new();
        let rx = publisher.subscribe("test", 16);
        let mut pipe =
            AudioPipe::spawn(Box::new(source.into()), null_sink(), publisher).unwrap();

        assert_eq!(rx.iter().take(2).count(), 2);
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipe.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!pipe.is_running());
        assert!(pipe.fatal_error().unwrap().contains("failed after 2 reads"));
        assert!(pipe.stop(SourceDisposition::Reclaim).is_none());
    }
}
