//! Command line flags. Every flag is optional and overrides the matching
//! value from `config.toml` / `WAKE_*` environment variables.

use crate::wake::detector::DetectorBackend;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "snowboy-wake-server", version, about = "Streaming wake word detection server")]
pub struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory with the bundled keyword models
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory with custom keyword models (*.pmdl, *.umdl); repeatable
    #[arg(long, value_name = "DIR")]
    pub custom_model_dir: Vec<PathBuf>,

    /// Keyword used when a client streams audio without selecting one
    #[arg(long)]
    pub default_keyword: Option<String>,

    /// Default detection sensitivity (0.0 - 1.0)
    #[arg(long)]
    pub sensitivity: Option<f64>,

    /// Default audio gain multiplier
    #[arg(long)]
    pub audio_gain: Option<f32>,

    /// Enable the detector's audio frontend by default
    #[arg(long)]
    pub apply_frontend: bool,

    /// Detector implementation
    #[arg(long, value_enum)]
    pub backend: Option<DetectorBackend>,

    /// Log DEBUG messages
    #[arg(long)]
    pub debug: bool,
}
