//! Integer PCM to normalized float conversion.
//!
//! Integers map onto [-1, 1] with the symmetric affine mapping
//! `(value - MIN) / (MAX - MIN) * 2 - 1`, so the type's minimum and maximum
//! land exactly on -1 and +1. All PCM is little-endian.

use crate::audio::device::CaptureDevice;
use crate::audio::format::{AudioFormat, SampleType};
use crate::error::{AudioscopeError, Result};
use std::io;

/// Decoder for one integer PCM layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleConverter {
    S16,
    U16,
    S32,
    U32,
}

impl SampleConverter {
    /// Picks the converter for a sample type and width.
    ///
    /// Returns `Ok(None)` for 32-bit float, which is decoded as-is.
    ///
    /// # Errors
    /// `UnsupportedFormat` for anything else (24-bit, 8-bit, 64-bit float, ...).
    pub fn for_format(sample_type: SampleType, bits: u16) -> Result<Option<Self>> {
        match (sample_type, bits) {
            (SampleType::SignedInt, 16) => Ok(Some(Self::S16)),
            (SampleType::SignedInt, 32) => Ok(Some(Self::S32)),
            (SampleType::UnsignedInt, 16) => Ok(Some(Self::U16)),
            (SampleType::UnsignedInt, 32) => Ok(Some(Self::U32)),
            (SampleType::Float, 32) => Ok(None),
            _ => Err(AudioscopeError::UnsupportedFormat {
                format: AudioFormat::new(0, 1, sample_type, bits).sample_tag(),
            }),
        }
    }

    /// Size in bytes of one encoded sample.
    pub fn element_size(self) -> usize {
        match self {
            Self::S16 | Self::U16 => 2,
            Self::S32 | Self::U32 => 4,
        }
    }

    /// Replaces `dest` with the decoded samples in `bytes`.
    ///
    /// A trailing partial sample is ignored.
    pub fn convert(self, bytes: &[u8], dest: &mut Vec<f32>) {
        dest.clear();
        let size = self.element_size();
        dest.reserve(bytes.len() / size);
        for chunk in bytes.chunks_exact(size) {
            let value = match self {
                Self::S16 => normalize(
                    i16::from_le_bytes([chunk[0], chunk[1]]) as f64,
                    i16::MIN as f64,
                    i16::MAX as f64,
                ),
                Self::U16 => normalize(
                    u16::from_le_bytes([chunk[0], chunk[1]]) as f64,
                    u16::MIN as f64,
                    u16::MAX as f64,
                ),
                Self::S32 => normalize(
                    i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
                    i32::MIN as f64,
                    i32::MAX as f64,
                ),
                Self::U32 => normalize(
                    u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
                    u32::MIN as f64,
                    u32::MAX as f64,
                ),
            };
            dest.push(value);
        }
    }
}

fn normalize(value: f64, min: f64, max: f64) -> f32 {
    ((value - min) / (max - min) * 2.0 - 1.0) as f32
}

/// Replaces `dest` with the little-endian f32 samples in `bytes`.
pub fn decode_f32(bytes: &[u8], dest: &mut Vec<f32>) {
    dest.clear();
    dest.extend(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );
}

/// Decodes with the given converter, or as raw f32 when there is none.
pub fn decode(converter: Option<SampleConverter>, bytes: &[u8], dest: &mut Vec<f32>) {
    match converter {
        Some(converter) => converter.convert(bytes, dest),
        None => decode_f32(bytes, dest),
    }
}

/// Reads up to `bytes_to_read` bytes from the device and decodes them into `dest`.
///
/// Short reads truncate the output to the whole samples actually read.
/// Only a real I/O error is returned as an error.
pub fn read_and_convert(
    device: &mut dyn CaptureDevice,
    converter: Option<SampleConverter>,
    bytes_to_read: usize,
    scratch: &mut Vec<u8>,
    dest: &mut Vec<f32>,
) -> io::Result<usize> {
    scratch.resize(bytes_to_read, 0);
    let read = device.read(&mut scratch[..])?;
    scratch.truncate(read.min(bytes_to_read));
    decode(converter, scratch, dest);
    Ok(dest.len())
}

/// Appends `value` encoded in `format`'s sample layout to `out`.
///
/// Inverse of the decoding mapping; values outside [-1, 1] are clamped.
/// Unsupported layouts are written as f32.
pub fn encode_sample(value: f32, format: &AudioFormat, out: &mut Vec<u8>) {
    let x = value.clamp(-1.0, 1.0) as f64;
    let scale = |min: f64, max: f64| ((x + 1.0) / 2.0 * (max - min) + min).round().clamp(min, max);
    match SampleConverter::for_format(format.sample_type, format.bits) {
        Ok(Some(SampleConverter::S16)) => {
            out.extend_from_slice(&(scale(i16::MIN as f64, i16::MAX as f64) as i16).to_le_bytes())
        }
        Ok(Some(SampleConverter::U16)) => {
            out.extend_from_slice(&(scale(0.0, u16::MAX as f64) as u16).to_le_bytes())
        }
        Ok(Some(SampleConverter::S32)) => {
            out.extend_from_slice(&(scale(i32::MIN as f64, i32::MAX as f64) as i32).to_le_bytes())
        }
        Ok(Some(SampleConverter::U32)) => {
            out.extend_from_slice(&(scale(0.0, u32::MAX as f64) as u32).to_le_bytes())
        }
        Ok(None) | Err(_) => out.extend_from_slice(&value.to_le_bytes()),
    }
}
