//! Audio input and output: formats, PCM conversion, device seams and sources.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod convert;
pub mod device;
pub mod format;
pub mod source;
pub mod synthetic;

pub use device::{CaptureDevice, RenderDevice, RenderDeviceFactory};
pub use format::{AudioFormat, SampleSpec, SampleType};
pub use source::{AudioInputSource, AudioSource, InputSource};
pub use synthetic::{
    MemoryRender, MemoryRenderFactory, MemoryRenderProbe, SyntheticCapture, SyntheticSource,
    Waveform,
};
