//! Capture-to-analysis pipeline.
//!
//! The audio pipe reads the source on its own thread, publishes immutable mono
//! blocks to subscribers and forwards the original audio to the output driver.
//! Each processor runs as a station in its own thread, connected by bounded
//! crossbeam channels.

pub mod error;
pub mod fft_station;
pub mod output;
pub mod pipe;
pub mod queue;
pub mod rms_station;
pub mod station;
pub mod types;

pub use error::{ErrorReporter, LogReporter, StationError};
pub use fft_station::{FftProcessor, FftStation};
pub use output::{AudioOutputDriver, NullOutputDriver, OutputDriver, SinkClock};
pub use pipe::{AudioPipe, PipeStartError, Publisher, SourceDisposition, downmix};
pub use queue::TimedDataQueue;
pub use rms_station::{RmsProcessor, RmsStation};
pub use station::{Station, StationRunner};
pub use types::{RealFftBlock, RmsBlock, SampleBlock, SharedBlock, Timestamped};
