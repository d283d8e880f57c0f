//! Control surface over one audio pipe.
//!
//! The engine owns the configured source between runs, builds a sink for
//! each run and hands both to a fresh [`AudioPipe`]. Processors subscribe
//! through the engine's publisher and outlive individual runs.

use crate::audio::device::RenderDeviceFactory;
use crate::audio::format::AudioFormat;
use crate::audio::source::{AudioSource, InputSource};
use crate::clock::{SharedClock, system_clock};
use crate::defaults;
use crate::error::{AudioscopeError, Result};
use crate::pipeline::error::LogReporter;
use crate::pipeline::output::{AudioOutputDriver, NullOutputDriver, OutputDriver};
use crate::pipeline::pipe::{AudioPipe, PipeStartError, Publisher, SourceDisposition};
use crate::pipeline::station::{Station, StationRunner};
use crate::pipeline::types::SharedBlock;
use crossbeam_channel::{Receiver, bounded};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
}

/// Output settings applied on each start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Output device buffer length.
    pub output_buffer_ms: u32,
    /// Overflow length at which the output driver drops queued audio.
    pub drop_ms: u32,
    /// Latency reported when no output device is configured.
    pub null_latency: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_buffer_ms: defaults::OUTPUT_BUFFER_MS,
            drop_ms: defaults::OUTPUT_DROP_MS,
            null_latency: Duration::from_millis(defaults::NULL_OUTPUT_LATENCY_MS as u64),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    clock: SharedClock,
    state: EngineState,
    source: Option<Box<InputSource>>,
    output: Option<Arc<dyn RenderDeviceFactory>>,
    pipe: Option<AudioPipe>,
    publisher: Publisher,
    last_error: Option<String>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: EngineConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            state: EngineState::Stopped,
            source: None,
            output: None,
            pipe: None,
            publisher: Publisher::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    fn require_stopped(&self, what: &str) -> Result<()> {
        if self.is_running() {
            return Err(AudioscopeError::usage(format!(
                "cannot {} while the engine is running",
                what
            )));
        }
        Ok(())
    }

    /// Replaces the input source. Only allowed while stopped.
    pub fn set_source(&mut self, source: impl Into<InputSource>) -> Result<()> {
        self.require_stopped("change the input source")?;
        self.source = Some(Box::new(source.into()));
        Ok(())
    }

    /// Sets the output device, or `None` to run without audible output.
    pub fn set_output_device(&mut self, output: Option<Arc<dyn RenderDeviceFactory>>) -> Result<()> {
        self.require_stopped("change the output device")?;
        self.output = output;
        Ok(())
    }

    /// Sets the output buffer length used from the next start.
    pub fn set_target_output_latency(&mut self, millis: u32) -> Result<()> {
        self.require_stopped("change the output latency")?;
        self.config.output_buffer_ms = millis;
        Ok(())
    }

    /// The stored source, present while stopped.
    pub fn source(&self) -> Option<&InputSource> {
        self.source.as_deref()
    }

    /// Opens the sink and starts a new pipe over the stored source.
    ///
    /// # Errors
    /// - `Usage` when already running or when no source is set
    /// - `Configuration` when the output device rejects the format; the
    ///   source is kept
    /// - whatever the source or sink reported while starting
    pub fn start(&mut self) -> Result<()> {
        self.require_stopped("start")?;
        let source = self
            .source
            .take()
            .ok_or_else(|| AudioscopeError::usage("no input source set"))?;

        let sink = match self.build_sink(source.format()) {
            Ok(sink) => sink,
            Err(e) => {
                self.source = Some(source);
                return Err(e);
            }
        };

        match AudioPipe::spawn(source, sink, self.publisher.clone()) {
            Ok(pipe) => {
                self.pipe = Some(pipe);
                self.last_error = None;
                self.state = EngineState::Running;
                Ok(())
            }
            Err(PipeStartError { error, source }) => {
                self.source = source;
                Err(error)
            }
        }
    }

    fn build_sink(&self, source_format: AudioFormat) -> Result<OutputDriver> {
        let Some(factory) = &self.output else {
            return Ok(OutputDriver::Null(NullOutputDriver::new(
                self.clock.clone(),
                self.config.null_latency,
            )));
        };

        let format = AudioFormat::float32(source_format.sample_rate, source_format.channel_count);
        let buffer_bytes = format.bytes_for_millis(self.config.output_buffer_ms);
        let device = factory.open_render(&format, buffer_bytes)?;
        log::info!(
            "output '{}' opened: {}, {} ms buffer",
            factory.name(),
            format,
            self.config.output_buffer_ms
        );
        Ok(OutputDriver::Device(AudioOutputDriver::new(
            device,
            self.config.drop_ms,
            self.clock.clone(),
        )))
    }

    /// Stops the pipe and takes the source back.
    ///
    /// The source is gone afterwards if the pipe ended on a fatal error.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(AudioscopeError::usage("engine is not running"));
        }
        if let Some(mut pipe) = self.pipe.take() {
            self.source = pipe.stop(SourceDisposition::Reclaim);
            self.last_error = pipe.fatal_error();
            if let Some(error) = &self.last_error {
                log::warn!("pipe had stopped on error, source discarded: {}", error);
            }
        }
        self.state = EngineState::Stopped;
        Ok(())
    }

    /// Sink clock of the running pipe, or the current time when stopped.
    pub fn sink_time(&self) -> Instant {
        match &self.pipe {
            Some(pipe) => pipe.sink_time(),
            None => self.clock.now(),
        }
    }

    /// How far the sink clock trails the current time.
    pub fn output_latency(&self) -> Duration {
        self.clock
            .now()
            .saturating_duration_since(self.sink_time())
    }

    /// Error that ended the current or last run.
    pub fn pipe_error(&self) -> Option<String> {
        match &self.pipe {
            Some(pipe) => pipe.fatal_error(),
            None => self.last_error.clone(),
        }
    }

    /// Subscribes to the raw block stream.
    pub fn subscribe(&self, name: &str, capacity: usize) -> Receiver<SharedBlock> {
        self.publisher.subscribe(name, capacity)
    }

    /// Runs `station` on its own thread, fed from the block stream.
    ///
    /// Returns the runner and the station's result channel. The station
    /// exits once the engine is dropped.
    pub fn attach<S>(&self, station: S, capacity: usize) -> Result<(StationRunner<S>, Receiver<S::Output>)>
    where
        S: Station<Input = SharedBlock>,
    {
        let input = self.publisher.subscribe(station.name(), capacity);
        let (tx, rx) = bounded(capacity.max(1));
        let runner = StationRunner::spawn(station, input, tx, Arc::new(LogReporter))?;
        Ok((runner, rx))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.stop(SourceDisposition::Release);
        }
        self.publisher.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleType;
    use crate::audio::source::AudioInputSource;
    use crate::audio::synthetic::{MemoryRenderFactory, SyntheticCapture, SyntheticSource};
    use crate::clock::{Clock, ManualClock};
    use crate::pipeline::rms_station::RmsStation;

    fn synthetic() -> SyntheticSource {
        SyntheticSource::new(8000, 2)
            .with_frames_per_read(800)
            .with_max_reads(4)
            .paced(false)
    }

    #[test]
    fn test_start_without_source_is_usage_error() {
        let mut engine = Engine::new(EngineConfig::default());
        assert!(engine.start().unwrap_err().is_usage());
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_stop_while_stopped_is_usage_error() {
        let mut engine = Engine::new(EngineConfig::default());
        assert!(engine.stop().unwrap_err().is_usage());

        engine.set_source(synthetic()).unwrap();
        assert!(engine.stop().unwrap_err().is_usage());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.source().is_some());
    }

    #[test]
    fn test_lifecycle_returns_source() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_source(synthetic()).unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        assert!(engine.source().is_none());

        assert!(engine.set_source(synthetic()).unwrap_err().is_usage());
        assert!(engine.set_output_device(None).unwrap_err().is_usage());
        assert!(engine.set_target_output_latency(50).unwrap_err().is_usage());
        assert!(engine.start().unwrap_err().is_usage());
        assert!(engine.is_running());

        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.source().is_some());
        assert!(engine.pipe_error().is_none());

        // Restartable with the reclaimed source.
        engine.start().unwrap();
        engine.stop().unwrap();
    }

    #[test]
    fn test_rejected_output_format_keeps_source() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_source(synthetic()).unwrap();
        engine
            .set_output_device(Some(Arc::new(MemoryRenderFactory::rejecting())))
            .unwrap();

        let err = engine.start().unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.source().is_some());
    }

    #[test]
    fn test_output_opened_as_float_with_source_layout() {
        let factory = Arc::new(MemoryRenderFactory::new());
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_source(synthetic()).unwrap();
        engine
            .set_output_device(Some(factory.clone() as Arc<dyn RenderDeviceFactory>))
            .unwrap();
        engine.start().unwrap();

        let probe = factory.last_probe().unwrap();
        assert_eq!(probe.format(), AudioFormat::float32(8000, 2));
        assert!(probe.is_open());
        engine.stop().unwrap();
        assert!(!probe.is_open());
    }

    #[test]
    fn test_sink_time_when_stopped_is_now() {
        let clock = ManualClock::new();
        let engine = Engine::with_clock(EngineConfig::default(), clock.shared());
        assert_eq!(engine.sink_time(), clock.now());
        assert_eq!(engine.output_latency(), Duration::ZERO);
    }

    #[test]
    fn test_output_latency_covers_device_buffer() {
        let clock = ManualClock::new();
        let mut engine = Engine::with_clock(EngineConfig::default(), clock.shared());
        engine.set_source(synthetic()).unwrap();
        engine
            .set_output_device(Some(Arc::new(MemoryRenderFactory::new())))
            .unwrap();
        engine.start().unwrap();
        assert!(engine.output_latency() >= Duration::from_millis(100));
        engine.stop().unwrap();
    }

    #[test]
    fn test_null_output_latency_saturates_at_zero() {
        let clock = ManualClock::new();
        let config = EngineConfig {
            null_latency: Duration::from_millis(40),
            ..EngineConfig::default()
        };
        let mut engine = Engine::with_clock(config, clock.shared());
        engine.set_source(synthetic()).unwrap();
        engine.start().unwrap();
        assert_eq!(engine.sink_time(), clock.now() + Duration::from_millis(40));
        assert_eq!(engine.output_latency(), Duration::ZERO);
        engine.stop().unwrap();
    }

    #[test]
    fn test_failed_device_start_keeps_source() {
        let format = AudioFormat::new(8000, 1, SampleType::SignedInt, 16);
        let source =
            AudioInputSource::new(Box::new(SyntheticCapture::new(format, 80).failing_open()))
                .unwrap();
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_source(source).unwrap();

        assert!(engine.start().is_err());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.source().is_some());
    }

    #[test]
    fn test_fatal_read_loses_source_on_stop() {
        let mut engine = Engine::new(EngineConfig::default());
        engine
            .set_source(
                SyntheticSource::new(8000, 1)
                    .with_frames_per_read(80)
                    .with_read_failure_after(1)
                    .paced(false),
            )
            .unwrap();
        let blocks = engine.subscribe("test", 8);
        engine.start().unwrap();
        blocks.recv_timeout(Duration::from_secs(5)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.pipe_error().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(engine.pipe_error().is_some());

        engine.stop().unwrap();
        assert!(engine.source().is_none());
        assert!(engine.pipe_error().is_some());
        assert!(engine.start().unwrap_err().is_usage());
    }

    #[test]
    fn test_dropping_engine_ends_attached_stations() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_source(synthetic()).unwrap();
        let (runner, results) = engine.attach(RmsStation::new(), 16).unwrap();
        engine.start().unwrap();

        // Four reads of 800 stereo frames at 8 kHz make four 100 ms windows.
        let levels: Vec<_> = results.iter().take(4).collect();
        assert_eq!(levels.len(), 4);

        drop(engine);
        runner.join().unwrap();
    }
}
