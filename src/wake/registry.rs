//! # Keyword Registry
//!
//! Discovers keyword models on disk and turns a keyword name into a ready
//! detector configuration.
//!
//! ## Discovery Rules:
//! - Directories are searched in priority order: custom model directories as
//!   configured, then the bundled data directory
//! - Every `*.umdl` / `*.pmdl` file is a keyword named after its file stem
//! - The first directory that provides a name wins; later ones are ignored
//!   for that name
//! - Inside one directory a `.umdl` beats a `.pmdl` with the same stem
//!
//! The registry keeps no cache. Every call rescans the directories, so models
//! dropped into a custom directory are picked up without a restart and
//! concurrent readers never observe a half-updated view.

use crate::config::AppConfig;
use crate::error::WakeError;
use crate::wake::detector::DetectorConfig;
use crate::wake::info::Attribution;
use crate::wake::settings::{KeywordSettings, SettingsTable};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Recognized model file extensions, in preference order.
pub const MODEL_EXTENSIONS: [&str; 2] = ["umdl", "pmdl"];

/// One discovered keyword model.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub name: String,
    pub model_path: PathBuf,
    pub settings: KeywordSettings,
}

/// Keyword metadata for capability reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordInfo {
    pub name: String,
    pub description: String,
    pub attribution: Attribution,
    pub installed: bool,
    pub languages: Vec<String>,
}

/// Server-wide values used for any setting a keyword does not override.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordDefaults {
    pub sensitivity: f64,
    pub audio_gain: f32,
    pub apply_frontend: bool,
}

/// Read-only view over the keyword model directories.
#[derive(Debug, Clone)]
pub struct KeywordRegistry {
    search_dirs: Vec<PathBuf>,
    resource_path: PathBuf,
    settings: SettingsTable,
    defaults: KeywordDefaults,
}

impl KeywordRegistry {
    pub fn new(
        search_dirs: Vec<PathBuf>,
        resource_path: PathBuf,
        settings: SettingsTable,
        defaults: KeywordDefaults,
    ) -> Self {
        Self {
            search_dirs,
            resource_path,
            settings,
            defaults,
        }
    }

    /// Build the registry described by the application configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, WakeError> {
        let settings = SettingsTable::builtin()?.with_overrides(&config.keywords.overrides);

        Ok(Self::new(
            config.keywords.search_dirs(),
            config.keywords.resource_path(),
            settings,
            KeywordDefaults {
                sensitivity: config.detection.sensitivity,
                audio_gain: config.detection.audio_gain,
                apply_frontend: config.detection.apply_frontend,
            },
        ))
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Every resolvable keyword, keyed and ordered by name.
    pub fn discover(&self) -> BTreeMap<String, Keyword> {
        let mut keywords = BTreeMap::new();

        for dir in &self.search_dirs {
            for (name, model_path) in scan_dir(dir) {
                keywords.entry(name.clone()).or_insert_with(|| Keyword {
                    settings: self.settings.get(&name),
                    name,
                    model_path,
                });
            }
        }

        keywords
    }

    /// Look up one keyword, stopping at the first directory that has it.
    pub fn find(&self, name: &str) -> Option<Keyword> {
        self.search_dirs.iter().find_map(|dir| {
            scan_dir(dir)
                .into_iter()
                .find(|(stem, _)| stem == name)
                .map(|(name, model_path)| Keyword {
                    settings: self.settings.get(&name),
                    name,
                    model_path,
                })
        })
    }

    /// Merge keyword overrides with the defaults and expand sensitivities.
    pub fn resolve(&self, name: &str) -> Result<DetectorConfig, WakeError> {
        let keyword = self
            .find(name)
            .ok_or_else(|| WakeError::UnknownKeyword(name.to_string()))?;

        let settings = &keyword.settings;
        let sensitivity = settings.sensitivity.unwrap_or(self.defaults.sensitivity);
        let audio_gain = settings.audio_gain.unwrap_or(self.defaults.audio_gain);
        let apply_frontend = settings.apply_frontend.unwrap_or(self.defaults.apply_frontend);

        let config = DetectorConfig {
            keyword: keyword.name,
            model_path: keyword.model_path,
            resource_path: self.resource_path.clone(),
            sensitivities: vec![sensitivity; settings.sub_model_count()],
            audio_gain,
            apply_frontend,
        };

        debug!(
            keyword = %config.keyword,
            sensitivity = %config.sensitivity_string(),
            audio_gain = config.audio_gain,
            apply_frontend = config.apply_frontend,
            "Resolved keyword"
        );

        Ok(config)
    }

    /// Capability metadata for every resolvable keyword.
    pub fn list_all(&self) -> Vec<KeywordInfo> {
        self.discover()
            .into_values()
            .map(|keyword| KeywordInfo {
                description: keyword.name.clone(),
                name: keyword.name,
                attribution: Attribution::kitt_ai(),
                installed: true,
                languages: Vec::new(),
            })
            .collect()
    }
}

/// `(name, path)` pairs for the model files in one directory, `.umdl` first.
fn scan_dir(dir: &Path) -> Vec<(String, PathBuf)> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "Skipping unreadable model directory");
            return Vec::new();
        }
    };

    let mut models: Vec<(usize, String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let rank = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(|ext| MODEL_EXTENSIONS.iter().position(|known| *known == ext))?;
            let stem = path.file_stem()?.to_str()?.to_string();
            Some((rank, stem, path))
        })
        .collect();

    models.sort();
    models.into_iter().map(|(_, name, path)| (name, path)).collect()
}
