//! Capability report sent in answer to `describe` and served at
//! `/api/v1/keywords`.

use crate::wake::registry::KeywordRegistry;
use serde::Serialize;

pub const PROGRAM_NAME: &str = "snowboy";
pub const PROGRAM_DESCRIPTION: &str = "DNN based hotword and wake word detection toolkit";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

impl Attribution {
    pub fn kitt_ai() -> Self {
        Self {
            name: "Kitt.AI".to_string(),
            url: "https://github.com/Kitt-AI/snowboy".to_string(),
        }
    }
}

/// One keyword model as advertised to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WakeModel {
    pub name: String,
    pub description: String,
    pub attribution: Attribution,
    pub installed: bool,
    pub languages: Vec<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WakeProgram {
    pub name: String,
    pub description: String,
    pub attribution: Attribution,
    pub installed: bool,
    pub version: String,
    pub models: Vec<WakeModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Info {
    pub wake: Vec<WakeProgram>,
}

impl Info {
    pub fn model_count(&self) -> usize {
        self.wake.iter().map(|program| program.models.len()).sum()
    }
}

/// Snapshot of the installed keywords. Rescans the registry on each call.
pub fn describe(registry: &KeywordRegistry) -> Info {
    let models = registry
        .list_all()
        .into_iter()
        .map(|keyword| WakeModel {
            name: keyword.name,
            description: keyword.description,
            attribution: keyword.attribution,
            installed: keyword.installed,
            languages: keyword.languages,
            version: None,
        })
        .collect();

    Info {
        wake: vec![WakeProgram {
            name: PROGRAM_NAME.to_string(),
            description: PROGRAM_DESCRIPTION.to_string(),
            attribution: Attribution::kitt_ai(),
            installed: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            models,
        }],
    }
}
