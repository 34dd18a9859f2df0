//! # Keyword Settings
//!
//! Per-keyword overrides for sensitivity, audio gain, frontend processing and
//! the number of hotwords packed into one model file. The built-in table is a
//! TOML document compiled into the binary; operators extend or override it
//! from the `[keywords.overrides]` section of the configuration.

use crate::error::WakeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Built-in overrides for well-known universal models.
const BUILTIN_TABLE: &str = include_str!("keyword_defaults.toml");

/// Optional overrides for one keyword. `None` means "use the server default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_gain: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_frontend: Option<bool>,

    /// Hotwords encoded in the model file, each needing its own sensitivity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_keywords: Option<u32>,
}

impl KeywordSettings {
    /// Layer `other` on top of `self`: fields set in `other` win.
    pub fn overlay(&self, other: &KeywordSettings) -> KeywordSettings {
        KeywordSettings {
            sensitivity: other.sensitivity.or(self.sensitivity),
            audio_gain: other.audio_gain.or(self.audio_gain),
            apply_frontend: other.apply_frontend.or(self.apply_frontend),
            num_keywords: other.num_keywords.or(self.num_keywords),
        }
    }

    /// Number of sub-models, never less than one.
    pub fn sub_model_count(&self) -> usize {
        self.num_keywords.unwrap_or(1).max(1) as usize
    }
}

/// Immutable name → settings mapping loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct SettingsTable {
    entries: HashMap<String, KeywordSettings>,
}

impl SettingsTable {
    /// Parse the compiled-in table.
    pub fn builtin() -> Result<Self, WakeError> {
        Self::from_toml(BUILTIN_TABLE)
    }

    /// Parse a table where every top-level key is a keyword name.
    pub fn from_toml(source: &str) -> Result<Self, WakeError> {
        let entries: HashMap<String, KeywordSettings> = toml::from_str(source)?;
        Ok(Self { entries })
    }

    /// The built-in table with operator overrides layered on top.
    pub fn with_overrides(mut self, overrides: &HashMap<String, KeywordSettings>) -> Self {
        for (name, settings) in overrides {
            let merged = self
                .entries
                .get(name)
                .map(|base| base.overlay(settings))
                .unwrap_or_else(|| settings.clone());
            self.entries.insert(name.clone(), merged);
        }
        self
    }

    /// Overrides for `name`, empty when the keyword is not listed.
    pub fn get(&self, name: &str) -> KeywordSettings {
        self.entries.get(name).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
