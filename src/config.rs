//! # Configuration Management
//!
//! Loads the server configuration from several layers, lowest priority first:
//!
//! 1. Built-in defaults (the `Default` impl below)
//! 2. A TOML file: `config.toml` in the working directory, or `--config <path>`
//! 3. Environment variables prefixed with `WAKE_`, nested keys separated by `__`
//!    (e.g. `WAKE_DETECTION__SENSITIVITY=0.6`, `WAKE_SERVER__PORT=10400`)
//! 4. Command line flags
//!
//! ## Example `config.toml`:
//! ```toml
//! [keywords]
//! data_dir = "/usr/share/snowboy"
//! custom_model_dirs = ["/var/lib/wake/custom"]
//! default_keyword = "snowboy"
//!
//! [keywords.overrides.hey_bob]
//! sensitivity = 0.6
//! num_keywords = 1
//!
//! [detection]
//! backend = "snowboy"
//! sensitivity = 0.5
//! ```

use crate::cli::Cli;
use crate::wake::detector::DetectorBackend;
use crate::wake::settings::KeywordSettings;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Canonical audio layout expected by every detector: 16 kHz, 16-bit, mono.
pub const CANONICAL_RATE: u32 = 16000;
pub const CANONICAL_WIDTH: u16 = 2;
pub const CANONICAL_CHANNELS: u16 = 1;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub keywords: KeywordsConfig,
    pub detection: DetectionConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// Network and connection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Seconds between WebSocket pings sent to each client
    pub heartbeat_interval_secs: u64,

    /// Clients silent for longer than this are disconnected
    pub client_timeout_secs: u64,

    /// Close the connection once an audio-stop has been answered
    pub close_after_stop: bool,
}

/// Where keyword models live and which one to use when a client never picks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordsConfig {
    /// Directory with the bundled keyword models, searched last
    pub data_dir: PathBuf,

    /// Extra model directories, searched in order before `data_dir`
    #[serde(default)]
    pub custom_model_dirs: Vec<PathBuf>,

    /// Keyword loaded when audio arrives before any selection
    pub default_keyword: String,

    /// Detector resource bundle; `<data_dir>/common.res` when unset
    #[serde(default)]
    pub resource_file: Option<PathBuf>,

    /// Operator overrides layered over the built-in keyword table
    #[serde(default)]
    pub overrides: HashMap<String, KeywordSettings>,
}

impl KeywordsConfig {
    /// Directories in discovery priority order.
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.custom_model_dirs.clone();
        dirs.push(self.data_dir.clone());
        dirs
    }

    pub fn resource_path(&self) -> PathBuf {
        self.resource_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("common.res"))
    }
}

/// Server-wide detection defaults, used when a keyword has no override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub backend: DetectorBackend,
    pub sensitivity: f64,
    pub audio_gain: f32,
    pub apply_frontend: bool,

    /// RMS level (0.0 - 1.0) under which the energy backend reports silence
    pub vad_threshold: f32,
}

/// Detection window geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Samples handed to the detector per call, in the canonical layout
    pub samples_per_window: usize,
}

impl AudioConfig {
    pub fn window_bytes(&self) -> usize {
        self.samples_per_window * CANONICAL_WIDTH as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 10400,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
                close_after_stop: false,
            },
            keywords: KeywordsConfig {
                data_dir: PathBuf::from("data"),
                custom_model_dirs: Vec::new(),
                default_keyword: "snowboy".to_string(),
                resource_file: None,
                overrides: HashMap::new(),
            },
            detection: DetectionConfig {
                backend: DetectorBackend::default(),
                sensitivity: 0.5,
                audio_gain: 1.0,
                apply_frontend: false,
                vad_threshold: 0.02,
            },
            audio: AudioConfig {
                samples_per_window: 1024,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 64,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, file, environment and CLI flags.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => config::File::from(path.as_path()).required(true),
            None => config::File::with_name("config").required(false),
        };

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("WAKE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = settings.try_deserialize()?;
        config.apply_cli(cli);
        Ok(config)
    }

    /// Command line flags win over every other source.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(dir) = &cli.data_dir {
            self.keywords.data_dir = dir.clone();
        }
        if !cli.custom_model_dir.is_empty() {
            self.keywords.custom_model_dirs = cli.custom_model_dir.clone();
        }
        if let Some(keyword) = &cli.default_keyword {
            self.keywords.default_keyword = keyword.clone();
        }
        if let Some(sensitivity) = cli.sensitivity {
            self.detection.sensitivity = sensitivity;
        }
        if let Some(gain) = cli.audio_gain {
            self.detection.audio_gain = gain;
        }
        if cli.apply_frontend {
            self.detection.apply_frontend = true;
        }
        if let Some(backend) = cli.backend {
            self.detection.backend = backend;
        }
    }

    /// Reject values that would make the server misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.heartbeat_interval_secs == 0
            || self.server.client_timeout_secs <= self.server.heartbeat_interval_secs
        {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than a non-zero heartbeat interval"
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.audio.samples_per_window == 0 {
            return Err(anyhow::anyhow!("Samples per window must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.detection.sensitivity) {
            return Err(anyhow::anyhow!(
                "Sensitivity must be between 0.0 and 1.0, got {}",
                self.detection.sensitivity
            ));
        }

        if self.detection.audio_gain <= 0.0 {
            return Err(anyhow::anyhow!("Audio gain must be positive"));
        }

        if self.keywords.default_keyword.trim().is_empty() {
            return Err(anyhow::anyhow!("Default keyword cannot be empty"));
        }

        for (name, settings) in &self.keywords.overrides {
            if let Some(sensitivity) = settings.sensitivity {
                if !(0.0..=1.0).contains(&sensitivity) {
                    return Err(anyhow::anyhow!(
                        "Sensitivity override for '{}' must be between 0.0 and 1.0, got {}",
                        name,
                        sensitivity
                    ));
                }
            }
            if let Some(gain) = settings.audio_gain {
                if !gain.is_finite() || gain <= 0.0 {
                    return Err(anyhow::anyhow!(
                        "Audio gain override for '{}' must be positive, got {}",
                        name,
                        gain
                    ));
                }
            }
            if settings.num_keywords == Some(0) {
                return Err(anyhow::anyhow!(
                    "Keyword count override for '{}' must be at least 1",
                    name
                ));
            }
        }

        Ok(())
    }
}
