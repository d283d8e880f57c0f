use audioscope::audio::format::{AudioFormat, SampleType};
use audioscope::audio::source::AudioInputSource;
use audioscope::audio::synthetic::{MemoryRenderFactory, SyntheticCapture, Waveform};
use audioscope::clock::{Clock, ManualClock};
use audioscope::engine::{Engine, EngineConfig};
use audioscope::pipeline::fft_station::FftStation;
use audioscope::pipeline::queue::TimedDataQueue;
use audioscope::pipeline::rms_station::RmsStation;
use audioscope::pipeline::types::{RealFftBlock, RmsBlock};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

const RATE: u32 = 48000;
const PERIOD: usize = 4800;
const TIMEOUT: Duration = Duration::from_secs(10);

fn capture(sample_type: SampleType, bits: u16, reads: u64, waveform: Waveform) -> SyntheticCapture {
    SyntheticCapture::new(AudioFormat::new(RATE, 1, sample_type, bits), PERIOD)
        .with_reads(reads)
        .with_waveform(waveform)
}

fn collect<T>(rx: &Receiver<T>, count: usize) -> Vec<T> {
    (0..count)
        .map(|i| {
            rx.recv_timeout(TIMEOUT)
                .unwrap_or_else(|e| panic!("result {} of {} not delivered: {}", i, count, e))
        })
        .collect()
}

#[test]
fn rms_windows_follow_the_device_clock() {
    let clock = ManualClock::new();
    let t0 = clock.now();
    let device = capture(
        SampleType::SignedInt,
        16,
        100,
        Waveform::Sine {
            frequency: 440.0,
            amplitude: 0.5,
        },
    );
    let source = AudioInputSource::with_clock(Box::new(device), clock.shared()).unwrap();

    let mut engine = Engine::with_clock(EngineConfig::default(), clock.shared());
    engine.set_source(source).unwrap();
    let (runner, results) = engine.attach(RmsStation::new(), 256).unwrap();
    engine.start().unwrap();

    let levels: Vec<RmsBlock> = collect(&results, 100);
    for (k, level) in levels.iter().enumerate() {
        assert_eq!(level.timestamp, t0 + Duration::from_millis(100 * k as u64));
        assert!(
            (level.current - 0.5 / 2f32.sqrt()).abs() < 1e-3,
            "window {} rms {}",
            k,
            level.current
        );
    }

    engine.stop().unwrap();
    drop(engine);
    runner.join().unwrap();
}

#[test]
fn spectrum_peak_tracks_the_tone() {
    let clock = ManualClock::new();
    let t0 = clock.now();
    let device = capture(
        SampleType::Float,
        32,
        20,
        Waveform::Sine {
            frequency: 1000.0,
            amplitude: 0.8,
        },
    );
    let source = AudioInputSource::with_clock(Box::new(device), clock.shared()).unwrap();

    let mut engine = Engine::with_clock(EngineConfig::default(), clock.shared());
    engine.set_source(source).unwrap();
    let (runner, results) = engine.attach(FftStation::new(4096, 25).unwrap(), 256).unwrap();
    engine.start().unwrap();

    // 20 periods of 4800 samples with a 1200-sample hop over 4096.
    let spectra: Vec<RealFftBlock> = collect(&results, 77);
    let bin_width = RATE as f32 / 4096.0;
    for (k, spectrum) in spectra.iter().enumerate() {
        assert_eq!(spectrum.timestamp, t0 + Duration::from_millis(25 * k as u64));
        assert_eq!(spectrum.magnitudes.len(), 2049);
        let peak = spectrum.peak_frequency().unwrap();
        assert!((peak - 1000.0).abs() <= bin_width, "frame {} peak {}", k, peak);
    }

    engine.stop().unwrap();
    drop(engine);
    runner.join().unwrap();
}

#[test]
fn results_become_due_at_sink_time() {
    let clock = ManualClock::new();
    let t0 = clock.now();
    let device = capture(SampleType::SignedInt, 16, 10, Waveform::Constant(0.25));
    let source = AudioInputSource::with_clock(Box::new(device), clock.shared()).unwrap();
    let factory = Arc::new(MemoryRenderFactory::new().autoplay());

    let mut engine = Engine::with_clock(EngineConfig::default(), clock.shared());
    engine.set_source(source).unwrap();
    engine.set_output_device(Some(factory.clone())).unwrap();
    let (runner, results) = engine.attach(RmsStation::new(), 64).unwrap();
    engine.start().unwrap();

    let mut queue: TimedDataQueue<RmsBlock> = TimedDataQueue::new(64);
    for level in collect(&results, 10) {
        queue.push(level);
    }

    let probe = factory.last_probe().unwrap();
    let deadline = Instant::now() + TIMEOUT;
    while probe.accepted_samples() < 10 * PERIOD as u64 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(probe.accepted_samples(), 10 * PERIOD as u64);

    // One second played minus the 100 ms device buffer.
    let sink = engine.sink_time();
    assert_eq!(sink, t0 + Duration::from_millis(900));

    let due = queue.fetch_up_to(t0 + Duration::from_millis(450));
    assert_eq!(due.len(), 5);
    let latest = queue.fetch_latest_up_to(sink).unwrap();
    assert_eq!(latest.timestamp, sink);
    assert!(queue.is_empty());

    engine.stop().unwrap();
    assert!(!probe.is_open());
    drop(engine);
    runner.join().unwrap();
}
