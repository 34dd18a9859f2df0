//! # Detector Adapter
//!
//! The acoustic wake word engine is an opaque primitive: build a handle for
//! one keyword model, then feed it fixed-size windows of canonical audio and
//! read back an integer result code. This module pins that contract down as
//! two narrow traits so sessions never depend on a concrete engine.
//!
//! ## Result codes:
//! - `-2`: silence
//! - `-1`: internal detector error
//! - ` 0`: voice activity, no keyword
//! - ` n`: keyword matched on sub-model `n` (1-based)
//!
//! ## Backends:
//! - **energy**: RMS gate, always available, never matches
//! - **snowboy**: the Snowboy C library, behind the `snowboy` cargo feature

use crate::config::DetectionConfig;
use crate::error::WakeError;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Everything a backend needs to build a handle for one keyword.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorConfig {
    pub keyword: String,
    pub model_path: PathBuf,
    pub resource_path: PathBuf,
    /// One entry per sub-model in the model file
    pub sensitivities: Vec<f64>,
    pub audio_gain: f32,
    pub apply_frontend: bool,
}

impl DetectorConfig {
    /// Sensitivities in the comma-joined form detectors expect, e.g. `0.5,0.5`.
    pub fn sensitivity_string(&self) -> String {
        self.sensitivities
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Interpretation of a raw detector result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Silence,
    Error,
    Voice,
    Hotword(u32),
}

impl From<i32> for Score {
    fn from(code: i32) -> Self {
        match code {
            n if n > 0 => Score::Hotword(n as u32),
            0 => Score::Voice,
            -2 => Score::Silence,
            _ => Score::Error,
        }
    }
}

/// A live detector handle bound to one keyword model.
///
/// Handles keep internal state between windows and are driven by exactly one
/// session. Dropping the handle releases it.
pub trait Detector: Send {
    /// Score one window of 16 kHz / 16-bit / mono little-endian PCM.
    fn run_detection(&mut self, window: &[u8]) -> i32;
}

/// Builds detector handles; shared by every session.
pub trait DetectorFactory: Send + Sync + fmt::Debug {
    fn create(&self, config: &DetectorConfig) -> Result<Box<dyn Detector>, WakeError>;

    /// Backend name reported by health endpoints.
    fn name(&self) -> &'static str;
}

/// Detector implementation selected in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    #[default]
    Energy,
    Snowboy,
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorBackend::Energy => write!(f, "energy"),
            DetectorBackend::Snowboy => write!(f, "snowboy"),
        }
    }
}

/// Build the factory for the configured backend.
pub fn factory_for(config: &DetectionConfig) -> anyhow::Result<Arc<dyn DetectorFactory>> {
    match config.backend {
        DetectorBackend::Energy => Ok(Arc::new(EnergyDetectorFactory::new(config.vad_threshold))),
        #[cfg(feature = "snowboy")]
        DetectorBackend::Snowboy => Ok(Arc::new(crate::wake::snowboy::SnowboyDetectorFactory)),
        #[cfg(not(feature = "snowboy"))]
        DetectorBackend::Snowboy => Err(anyhow::anyhow!(
            "the snowboy backend requires building with `--features snowboy`"
        )),
    }
}

/// Voice activity gate: reports silence or voice, never a keyword.
///
/// Lets the full event protocol run on machines without a keyword engine.
#[derive(Debug, Clone)]
pub struct EnergyDetectorFactory {
    threshold: f32,
}

impl EnergyDetectorFactory {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl DetectorFactory for EnergyDetectorFactory {
    fn create(&self, config: &DetectorConfig) -> Result<Box<dyn Detector>, WakeError> {
        debug!(
            keyword = %config.keyword,
            audio_gain = config.audio_gain,
            threshold = self.threshold,
            "Creating energy detector"
        );
        Ok(Box::new(EnergyDetector {
            threshold: self.threshold,
            gain: config.audio_gain,
        }))
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

struct EnergyDetector {
    threshold: f32,
    gain: f32,
}

impl Detector for EnergyDetector {
    fn run_detection(&mut self, window: &[u8]) -> i32 {
        let mut cursor = Cursor::new(window);
        let mut energy = 0.0f64;
        let mut count = 0usize;

        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            let normalized = (sample as f64 / i16::MAX as f64) * self.gain as f64;
            energy += normalized * normalized;
            count += 1;
        }

        if count == 0 {
            return -1;
        }

        let rms = (energy / count as f64).sqrt();
        if rms < self.threshold as f64 {
            -2
        } else {
            0
        }
    }
}
