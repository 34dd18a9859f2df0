//! # Audio Format Conversion
//!
//! Detectors only accept 16 kHz, 16-bit, mono little-endian PCM. Clients may
//! stream whatever their capture device produces, so every chunk passes
//! through an `AudioConverter` first.
//!
//! ## Pipeline:
//! 1. **Framing**: bytes that do not complete a frame are carried to the next chunk
//! 2. **Decoding**: 8-bit unsigned, 16/24/32-bit signed little-endian samples
//! 3. **Downmix**: channels are averaged into one
//! 4. **Resampling**: streaming linear interpolation to 16 kHz; the last input
//!    sample and the fractional read position survive between chunks
//!
//! Canonical input skips decoding entirely and is passed through untouched.

use crate::config::{CANONICAL_CHANNELS, CANONICAL_RATE, CANONICAL_WIDTH};
use crate::error::WakeError;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;

/// Slowest and fastest stream rates accepted from clients.
///
/// Upsampling multiplies the chunk size by `16000 / rate`, so the floor also
/// bounds how much memory a single chunk can claim.
pub const MIN_RATE: u32 = 4_000;
pub const MAX_RATE: u32 = 192_000;

/// Layout of a PCM stream as announced by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Samples per second
    pub rate: u32,
    /// Bytes per sample
    pub width: u16,
    pub channels: u16,
}

impl AudioFormat {
    pub fn canonical() -> Self {
        Self {
            rate: CANONICAL_RATE,
            width: CANONICAL_WIDTH,
            channels: CANONICAL_CHANNELS,
        }
    }

    pub fn is_canonical(&self) -> bool {
        *self == Self::canonical()
    }

    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    pub fn validate(&self) -> Result<(), WakeError> {
        if !(1..=4).contains(&self.width) {
            return Err(WakeError::UnsupportedFormat(format!(
                "sample width {} (expected 1-4 bytes)",
                self.width
            )));
        }
        if self.channels == 0 {
            return Err(WakeError::UnsupportedFormat("zero channels".to_string()));
        }
        if !(MIN_RATE..=MAX_RATE).contains(&self.rate) {
            return Err(WakeError::UnsupportedFormat(format!(
                "sample rate {} Hz (expected {}-{} Hz)",
                self.rate, MIN_RATE, MAX_RATE
            )));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::canonical()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz/{}-byte/{}ch", self.rate, self.width, self.channels)
    }
}

/// Stateful converter for one audio stream.
#[derive(Debug, Clone)]
pub struct AudioConverter {
    format: AudioFormat,
    /// Trailing bytes of an incomplete frame
    carry: Vec<u8>,
    /// Last mono input sample of the previous chunk
    last: Option<f32>,
    /// Read position of the next output sample, relative to `last`
    pos: f64,
}

impl Default for AudioConverter {
    fn default() -> Self {
        Self {
            format: AudioFormat::canonical(),
            carry: Vec::new(),
            last: None,
            pos: 0.0,
        }
    }
}

impl AudioConverter {
    /// Start a fresh stream in `format`, dropping any carried state.
    pub fn reset(&mut self, format: AudioFormat) -> Result<(), WakeError> {
        format.validate()?;
        self.format = format;
        self.carry.clear();
        self.last = None;
        self.pos = 0.0;
        Ok(())
    }

    /// Convert one chunk to canonical PCM bytes.
    ///
    /// A chunk announcing a different format than the current one resets the
    /// converter first.
    pub fn convert(&mut self, format: AudioFormat, chunk: &[u8]) -> Result<Vec<u8>, WakeError> {
        if format != self.format {
            self.reset(format)?;
        }

        if self.format.is_canonical() && self.carry.is_empty() && chunk.len() % 2 == 0 {
            return Ok(chunk.to_vec());
        }

        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(chunk);

        let frame = self.format.frame_bytes();
        let usable = data.len() - data.len() % frame;
        self.carry = data[usable..].to_vec();

        let mono = self.decode_mono(&data[..usable]);
        let samples = if self.format.rate == CANONICAL_RATE {
            mono
        } else {
            self.resample(&mono)
        };

        let mut out = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            let value = sample.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            out.extend_from_slice(&value.to_le_bytes());
        }
        Ok(out)
    }

    /// Decode whole frames and average their channels, in 16-bit scale.
    fn decode_mono(&self, frames: &[u8]) -> Vec<f32> {
        let channels = self.format.channels as usize;
        let mut cursor = Cursor::new(frames);
        let mut mono = Vec::with_capacity(frames.len() / self.format.frame_bytes().max(1));

        'frames: loop {
            let mut sum = 0.0f32;
            for _ in 0..channels {
                let sample = match self.format.width {
                    1 => cursor.read_u8().map(|s| (s as f32 - 128.0) * 256.0),
                    2 => cursor.read_i16::<LittleEndian>().map(|s| s as f32),
                    3 => cursor.read_i24::<LittleEndian>().map(|s| s as f32 / 256.0),
                    _ => cursor.read_i32::<LittleEndian>().map(|s| s as f32 / 65536.0),
                };
                match sample {
                    Ok(value) => sum += value,
                    Err(_) => break 'frames,
                }
            }
            mono.push(sum / channels as f32);
        }

        mono
    }

    /// Linear interpolation from the stream rate to the canonical rate.
    fn resample(&mut self, input: &[f32]) -> Vec<f32> {
        let step = self.format.rate as f64 / CANONICAL_RATE as f64;

        let mut samples = Vec::with_capacity(input.len() + 1);
        samples.extend(self.last);
        samples.extend_from_slice(input);

        let Some(&newest) = samples.last() else {
            return Vec::new();
        };

        let span = (samples.len() - 1) as f64;
        let mut out = Vec::with_capacity((input.len() as f64 / step) as usize + 1);
        while self.pos < span {
            let index = self.pos.floor() as usize;
            let frac = (self.pos - index as f64) as f32;
            out.push(samples[index] * (1.0 - frac) + samples[index + 1] * frac);
            self.pos += step;
        }

        self.pos -= span;
        self.last = Some(newest);
        out
    }
}
