//! Monitor application entry point.
//!
//! Wires a source, an optional output device and the RMS/FFT stations into an
//! engine, then prints the freshest results that are already audible.

#[cfg(feature = "cpal-audio")]
use crate::audio::capture::{
    CpalCaptureDevice, CpalOutputDevice, DeviceKind, list_devices, suppress_audio_warnings,
};
use crate::audio::device::RenderDeviceFactory;
#[cfg(feature = "cpal-audio")]
use crate::audio::source::AudioInputSource;
use crate::audio::source::InputSource;
use crate::audio::synthetic::{SyntheticSource, Waveform};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{AudioscopeError, Result};
use crate::pipeline::fft_station::FftStation;
use crate::pipeline::queue::TimedDataQueue;
use crate::pipeline::rms_station::RmsStation;
use crate::pipeline::types::{RealFftBlock, RmsBlock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Interval between printed readings.
const REFRESH: Duration = Duration::from_millis(50);

/// Amplitude of the generated sine.
const SYNTHETIC_AMPLITUDE: f32 = 0.5;

/// Overrides for one monitor run, taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct MonitorOptions {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub no_output: bool,
    pub duration: Duration,
    pub synthetic: Option<f32>,
    pub quiet: bool,
}

/// Run the monitor command: capture → analyze → print at sink time.
///
/// Returns when `duration` has elapsed, on Ctrl+C, or when the pipe fails.
pub fn run_monitor(mut config: Config, options: MonitorOptions) -> Result<()> {
    if let Some(device) = options.input_device.clone() {
        config.input.device = Some(device);
    }
    if let Some(device) = options.output_device.clone() {
        config.output.device = Some(device);
    }
    if options.no_output {
        config.output.enabled = false;
    }
    config.validate()?;

    let source = build_source(&config, options.synthetic)?;
    let output = build_output(&config)?;

    let mut engine = Engine::new(config.engine_config());
    engine.set_source(source)?;
    engine.set_output_device(output)?;

    let capacity = config.analysis.channel_capacity;
    let (rms_runner, rms_rx) = engine.attach(RmsStation::new(), capacity)?;
    let (fft_runner, fft_rx) = engine.attach(
        FftStation::new(config.analysis.fft_size, config.analysis.fft_period_ms)?,
        capacity,
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .map_err(|e| AudioscopeError::Other(format!("Failed to set Ctrl-C handler: {}", e)))?;

    engine.start()?;
    if !options.quiet {
        eprintln!("Monitoring for {}. Press Ctrl+C to stop.", humantime::format_duration(options.duration));
    }

    let mut rms_queue: TimedDataQueue<RmsBlock> = TimedDataQueue::new(config.analysis.queue_capacity);
    let mut fft_queue: TimedDataQueue<RealFftBlock> =
        TimedDataQueue::new(config.analysis.queue_capacity);
    let mut level: Option<RmsBlock> = None;
    let mut dominant: Option<f32> = None;

    let deadline = Instant::now() + options.duration;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(REFRESH);
        if engine.pipe_error().is_some() {
            break;
        }

        rms_queue.drain_from(&rms_rx);
        fft_queue.drain_from(&fft_rx);
        let audible = engine.sink_time();
        if let Some(latest) = rms_queue.fetch_latest_up_to(audible) {
            level = Some(latest);
        }
        if let Some(spectrum) = fft_queue.fetch_latest_up_to(audible) {
            dominant = spectrum.peak_frequency();
        }

        if !options.quiet {
            println!("{}", format_reading(level.as_ref(), dominant, engine.output_latency()));
        }
    }

    if !options.quiet && !running.load(Ordering::SeqCst) {
        eprintln!("\nShutting down...");
    }

    engine.stop()?;
    let failure = engine.pipe_error();
    drop(engine);

    for (name, result) in [("rms", rms_runner.join()), ("fft", fft_runner.join())] {
        if let Err(e) = result {
            log::error!("station '{}' did not shut down cleanly: {}", name, e);
        }
    }

    match failure {
        Some(message) => Err(AudioscopeError::AudioCapture { message }),
        None => Ok(()),
    }
}

fn format_reading(level: Option<&RmsBlock>, dominant: Option<f32>, latency: Duration) -> String {
    let level = match level {
        Some(block) => format!("rms {:.3} peak {:.3}", block.current, block.recent_peak),
        None => "rms   -   peak   -  ".to_string(),
    };
    let frequency = match dominant {
        Some(hz) => format!("{:>8.1} Hz", hz),
        None => format!("{:>8} Hz", "-"),
    };
    format!("{} | {} | latency {} ms", level, frequency, latency.as_millis())
}

fn build_source(config: &Config, synthetic: Option<f32>) -> Result<InputSource> {
    if let Some(frequency) = synthetic {
        let source = SyntheticSource::new(config.input.sample_rate, config.input.channels)
            .with_waveform(Waveform::Sine {
                frequency,
                amplitude: SYNTHETIC_AMPLITUDE,
            })
            .with_frames_per_read(config.input.period_frames as usize)
            .with_name(format!("sine {} Hz", frequency))
            .paced(true);
        return Ok(source.into());
    }

    #[cfg(feature = "cpal-audio")]
    {
        suppress_audio_warnings();
        let device = CpalCaptureDevice::new(
            config.input.device.as_deref(),
            config.input_format()?,
            config.input.period_frames as usize,
        )?;
        Ok(AudioInputSource::new(Box::new(device))?.into())
    }

    #[cfg(not(feature = "cpal-audio"))]
    {
        Err(AudioscopeError::configuration(
            "built without audio device support; use --synthetic",
        ))
    }
}

fn build_output(config: &Config) -> Result<Option<Arc<dyn RenderDeviceFactory>>> {
    if !config.output.enabled {
        return Ok(None);
    }

    #[cfg(feature = "cpal-audio")]
    {
        let device = CpalOutputDevice::new(config.output.device.as_deref())?;
        Ok(Some(Arc::new(device)))
    }

    #[cfg(not(feature = "cpal-audio"))]
    {
        log::warn!("built without audio device support; running without output");
        Ok(None)
    }
}

/// List available audio input and output devices.
#[cfg(feature = "cpal-audio")]
pub fn list_audio_devices() -> Result<()> {
    suppress_audio_warnings();
    for (kind, label) in [(DeviceKind::Input, "input"), (DeviceKind::Output, "output")] {
        let devices = list_devices(kind)?;
        if devices.is_empty() {
            println!("No audio {} devices found", label);
            continue;
        }
        println!("Available audio {} devices:", label);
        for (idx, device) in devices.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::AudioSource;

    #[test]
    fn test_format_reading_with_results() {
        let block = RmsBlock {
            timestamp: Instant::now(),
            current: 0.25,
            recent_peak: 0.5,
        };
        let line = format_reading(Some(&block), Some(440.0), Duration::from_millis(120));
        assert_eq!(line, "rms 0.250 peak 0.500 |    440.0 Hz | latency 120 ms");
    }

    #[test]
    fn test_format_reading_before_results() {
        let line = format_reading(None, None, Duration::ZERO);
        assert!(line.starts_with("rms   -"));
        assert!(line.ends_with("latency 0 ms"));
    }

    #[test]
    fn test_synthetic_source_follows_input_config() {
        let mut config = Config::default();
        config.input.sample_rate = 16000;
        config.input.channels = 2;
        let source = build_source(&config, Some(1000.0)).unwrap();
        assert_eq!(source.format().sample_rate, 16000);
        assert_eq!(source.format().channel_count, 2);
        assert_eq!(source.name(), "sine 1000 Hz");
    }

    #[test]
    fn test_disabled_output_builds_no_factory() {
        let mut config = Config::default();
        config.output.enabled = false;
        assert!(build_output(&config).unwrap().is_none());
    }
}
