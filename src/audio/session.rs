//! # Wake Session
//!
//! Protocol state for one client connection. The transport decodes frames
//! into `SessionEvent`s and forwards whatever `WakeEvent`s come back.
//!
//! ## States:
//! - **Stream**: `Idle` until an audio-start, `Streaming` until the audio-stop
//! - **Keyword**: `Unselected` until the client (or the default keyword
//!   fallback) loads a detector, `Active` afterwards
//!
//! ## Event Handling:
//! - **describe**: capability report
//! - **detect**: load the first named keyword; failures leave the previous
//!   keyword in place
//! - **audio-start**: clear `detected`, the window buffer and the converter
//! - **audio-chunk**: load the default keyword if none is active, convert,
//!   buffer, score every complete window
//! - **audio-stop**: report `not-detected` unless a window matched
//!
//! Events are processed one at a time by the owning actor, so nothing in
//! here needs a lock.

use crate::audio::buffer::WindowBuffer;
use crate::audio::converter::{AudioConverter, AudioFormat};
use crate::error::WakeError;
use crate::wake::detector::{Detector, DetectorFactory, Score};
use crate::wake::info::{describe, Info};
use crate::wake::registry::KeywordRegistry;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Inbound protocol events, already decoded from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Describe,
    Detect {
        names: Vec<String>,
    },
    AudioStart {
        format: AudioFormat,
        timestamp: Option<u64>,
    },
    AudioChunk {
        format: AudioFormat,
        timestamp: Option<u64>,
        audio: Vec<u8>,
    },
    AudioStop,
}

/// Outbound protocol events.
#[derive(Debug, Clone, PartialEq)]
pub enum WakeEvent {
    Info(Info),
    Detection {
        name: String,
        timestamp: Option<u64>,
    },
    NotDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
}

enum KeywordState {
    Unselected,
    Active {
        name: String,
        detector: Box<dyn Detector>,
    },
}

/// Per-session counters, logged on stop and teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub chunks_received: u64,
    pub windows_scored: u64,
    pub detections: u64,
}

pub struct WakeSession {
    client_id: Uuid,
    registry: Arc<KeywordRegistry>,
    detectors: Arc<dyn DetectorFactory>,
    default_keyword: String,
    keyword: KeywordState,
    stream: StreamState,
    buffer: WindowBuffer,
    converter: AudioConverter,
    detected: bool,
    stats: SessionStats,
}

impl fmt::Debug for WakeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeSession")
            .field("client_id", &self.client_id)
            .field("keyword", &self.active_keyword())
            .field("stream", &self.stream)
            .field("buffered", &self.buffer.len())
            .field("detected", &self.detected)
            .finish()
    }
}

impl WakeSession {
    pub fn new(
        registry: Arc<KeywordRegistry>,
        detectors: Arc<dyn DetectorFactory>,
        default_keyword: String,
        window_bytes: usize,
    ) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            registry,
            detectors,
            default_keyword,
            keyword: KeywordState::Unselected,
            stream: StreamState::Idle,
            buffer: WindowBuffer::new(window_bytes),
            converter: AudioConverter::default(),
            detected: false,
            stats: SessionStats::default(),
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn active_keyword(&self) -> Option<&str> {
        match &self.keyword {
            KeywordState::Unselected => None,
            KeywordState::Active { name, .. } => Some(name),
        }
    }

    #[cfg(test)]
    pub fn stream_state(&self) -> StreamState {
        self.stream
    }

    pub fn detected(&self) -> bool {
        self.detected
    }

    /// Canonical bytes waiting for the next full window.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Apply one inbound event and return what should be sent back.
    ///
    /// Errors are reported to the client; only those with
    /// [`WakeError::is_fatal`] end the session.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<WakeEvent>, WakeError> {
        match event {
            SessionEvent::Describe => Ok(vec![WakeEvent::Info(describe(&self.registry))]),
            SessionEvent::Detect { names } => {
                let Some(name) = names.first() else {
                    debug!(client_id = %self.client_id, "Empty keyword selection ignored");
                    return Ok(Vec::new());
                };
                if names.len() > 1 {
                    debug!(client_id = %self.client_id, ?names, "Only the first keyword is used");
                }
                self.select(name)?;
                Ok(Vec::new())
            }
            SessionEvent::AudioStart { format, timestamp } => {
                self.start(format, timestamp)?;
                Ok(Vec::new())
            }
            SessionEvent::AudioChunk {
                format,
                timestamp,
                audio,
            } => self.process_chunk(format, timestamp, &audio),
            SessionEvent::AudioStop => Ok(self.stop()),
        }
    }

    /// Resolve `name` and swap in a fresh detector for it.
    fn select(&mut self, name: &str) -> Result<(), WakeError> {
        let config = self.registry.resolve(name)?;
        let detector = self.detectors.create(&config)?;

        info!(
            client_id = %self.client_id,
            keyword = %config.keyword,
            model = %config.model_path.display(),
            "Keyword selected"
        );

        self.keyword = KeywordState::Active {
            name: config.keyword,
            detector,
        };
        if !self.buffer.is_empty() {
            debug!(client_id = %self.client_id, discarded = self.buffer.len(), "Dropping audio buffered for the previous keyword");
            self.buffer.clear();
        }
        Ok(())
    }

    /// Audio arrived before any selection: fall back to the default keyword.
    fn ensure_keyword(&mut self) -> Result<(), WakeError> {
        if matches!(self.keyword, KeywordState::Active { .. }) {
            return Ok(());
        }

        let default = self.default_keyword.clone();
        debug!(client_id = %self.client_id, keyword = %default, "Loading default keyword");
        self.select(&default)
            .map_err(|err| WakeError::MalformedEventSequence {
                keyword: default,
                reason: err.to_string(),
            })
    }

    fn start(&mut self, format: AudioFormat, timestamp: Option<u64>) -> Result<(), WakeError> {
        self.detected = false;
        self.buffer.clear();
        self.stream = StreamState::Streaming;
        debug!(client_id = %self.client_id, %format, ?timestamp, "Audio stream started");
        self.converter.reset(format)
    }

    fn process_chunk(
        &mut self,
        format: AudioFormat,
        timestamp: Option<u64>,
        audio: &[u8],
    ) -> Result<Vec<WakeEvent>, WakeError> {
        self.stats.chunks_received += 1;
        self.ensure_keyword()?;

        let pcm = self.converter.convert(format, audio)?;
        self.buffer.append(&pcm);
        let windows = self.buffer.drain_windows();

        let mut events = Vec::new();
        let KeywordState::Active { name, detector } = &mut self.keyword else {
            return Ok(events);
        };

        for window in windows {
            let code = detector.run_detection(&window);
            self.stats.windows_scored += 1;

            match Score::from(code) {
                Score::Hotword(index) => {
                    self.detected = true;
                    self.stats.detections += 1;
                    info!(
                        client_id = %self.client_id,
                        keyword = %name,
                        sub_model = index,
                        ?timestamp,
                        "Wake word detected"
                    );
                    events.push(WakeEvent::Detection {
                        name: name.clone(),
                        timestamp,
                    });
                }
                Score::Error => {
                    warn!(client_id = %self.client_id, keyword = %name, code, "Detector returned an error code");
                }
                Score::Silence | Score::Voice => {}
            }
        }

        Ok(events)
    }

    fn stop(&mut self) -> Vec<WakeEvent> {
        self.stream = StreamState::Idle;
        debug!(
            client_id = %self.client_id,
            detected = self.detected,
            chunks = self.stats.chunks_received,
            windows = self.stats.windows_scored,
            detections = self.stats.detections,
            "Audio stream stopped"
        );

        if self.detected {
            Vec::new()
        } else {
            vec![WakeEvent::NotDetected]
        }
    }
}

impl Drop for WakeSession {
    fn drop(&mut self) {
        debug!(
            client_id = %self.client_id,
            chunks = self.stats.chunks_received,
            windows = self.stats.windows_scored,
            detections = self.stats.detections,
            "Session released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake::detector::testing::ScriptedFactory;
    use crate::wake::registry::KeywordDefaults;
    use crate::wake::settings::SettingsTable;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const WINDOW: usize = 2048;

    fn registry(dir: &TempDir, models: &[&str]) -> Arc<KeywordRegistry> {
        for model in models {
            std::fs::write(dir.path().join(model), b"model").unwrap();
        }
        Arc::new(KeywordRegistry::new(
            vec![dir.path().to_path_buf()],
            PathBuf::from("common.res"),
            SettingsTable::builtin().unwrap(),
            KeywordDefaults {
                sensitivity: 0.5,
                audio_gain: 1.0,
                apply_frontend: false,
            },
        ))
    }

    fn session(
        registry: Arc<KeywordRegistry>,
        factory: Arc<ScriptedFactory>,
        default_keyword: &str,
    ) -> WakeSession {
        WakeSession::new(registry, factory, default_keyword.to_string(), WINDOW)
    }

    fn start() -> SessionEvent {
        SessionEvent::AudioStart {
            format: AudioFormat::canonical(),
            timestamp: Some(0),
        }
    }

    fn chunk(bytes: usize, timestamp: u64) -> SessionEvent {
        SessionEvent::AudioChunk {
            format: AudioFormat::canonical(),
            timestamp: Some(timestamp),
            audio: vec![0u8; bytes],
        }
    }

    fn detect(name: &str) -> SessionEvent {
        SessionEvent::Detect {
            names: vec![name.to_string()],
        }
    }

    #[test]
    fn test_detection_carries_fragment_timestamp() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![0, 1, 0]));
        let mut session = session(registry(&dir, &["alpha.umdl"]), factory.clone(), "snowboy");

        assert!(session.handle(detect("alpha")).unwrap().is_empty());
        assert!(session.handle(start()).unwrap().is_empty());

        let mut events = Vec::new();
        for ts in [10, 20, 30] {
            events.extend(session.handle(chunk(WINDOW, ts)).unwrap());
        }

        assert_eq!(
            events,
            vec![WakeEvent::Detection {
                name: "alpha".to_string(),
                timestamp: Some(20),
            }]
        );
        assert_eq!(session.buffered_bytes(), 0);
        assert!(session.detected());

        assert!(session.handle(SessionEvent::AudioStop).unwrap().is_empty());
        assert_eq!(session.stream_state(), StreamState::Idle);
        assert_eq!(factory.created_keywords(), vec!["alpha".to_string()]);
        assert_eq!(
            session.stats(),
            SessionStats {
                chunks_received: 3,
                windows_scored: 3,
                detections: 1
            }
        );
    }

    #[test]
    fn test_no_match_yields_single_not_detected() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![-2, 0, -1, 0]));
        let mut session = session(registry(&dir, &["alpha.umdl"]), factory, "alpha");

        session.handle(start()).unwrap();
        let mut events = Vec::new();
        // 3 fragments of 1.5 windows → 4 windows scored, 1024 bytes left over
        for ts in [1, 2, 3] {
            events.extend(session.handle(chunk(WINDOW + WINDOW / 2, ts)).unwrap());
        }
        events.extend(session.handle(SessionEvent::AudioStop).unwrap());

        assert_eq!(events, vec![WakeEvent::NotDetected]);
        assert_eq!(session.buffered_bytes(), WINDOW / 2);
        assert_eq!(session.stats().windows_scored, 4);
    }

    #[test]
    fn test_audio_start_resets_detected() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![1]));
        let mut session = session(registry(&dir, &["alpha.umdl"]), factory, "alpha");

        session.handle(start()).unwrap();
        assert_eq!(session.handle(chunk(WINDOW, 5)).unwrap().len(), 1);
        assert!(session.handle(SessionEvent::AudioStop).unwrap().is_empty());

        session.handle(start()).unwrap();
        assert!(!session.detected());
        assert!(session.handle(chunk(WINDOW, 6)).unwrap().is_empty());
        assert_eq!(
            session.handle(SessionEvent::AudioStop).unwrap(),
            vec![WakeEvent::NotDetected]
        );
    }

    #[test]
    fn test_stop_without_audio_reports_not_detected() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let mut session = session(registry(&dir, &[]), factory.clone(), "snowboy");

        assert_eq!(
            session.handle(SessionEvent::AudioStop).unwrap(),
            vec![WakeEvent::NotDetected]
        );
        assert!(factory.created_keywords().is_empty());
    }

    #[test]
    fn test_audio_loads_default_keyword() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![3]));
        let mut session = session(registry(&dir, &["snowboy.umdl"]), factory.clone(), "snowboy");

        let events = session.handle(chunk(WINDOW, 42)).unwrap();
        assert_eq!(
            events,
            vec![WakeEvent::Detection {
                name: "snowboy".to_string(),
                timestamp: Some(42),
            }]
        );
        assert_eq!(session.active_keyword(), Some("snowboy"));
        assert_eq!(factory.created_keywords(), vec!["snowboy".to_string()]);
    }

    #[test]
    fn test_unknown_keyword_keeps_previous_selection() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let mut session = session(registry(&dir, &["alpha.umdl"]), factory.clone(), "snowboy");

        session.handle(detect("alpha")).unwrap();
        let err = session.handle(detect("hey_bob")).unwrap_err();

        assert!(matches!(err, WakeError::UnknownKeyword(_)));
        assert!(!err.is_fatal());
        assert_eq!(session.active_keyword(), Some("alpha"));

        session.handle(start()).unwrap();
        assert!(session.handle(chunk(WINDOW, 1)).unwrap().is_empty());
        assert_eq!(factory.created_keywords(), vec!["alpha".to_string()]);
    }

    #[test]
    fn test_missing_default_keyword_is_fatal() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let mut session = session(registry(&dir, &["alpha.umdl"]), factory, "snowboy");

        session.handle(start()).unwrap();
        let err = session.handle(chunk(WINDOW, 1)).unwrap_err();
        assert!(matches!(err, WakeError::MalformedEventSequence { ref keyword, .. } if keyword == "snowboy"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_selection_uses_first_name_and_clears_buffer() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let mut session = session(
            registry(&dir, &["alpha.umdl", "beta.pmdl"]),
            factory.clone(),
            "alpha",
        );

        session.handle(start()).unwrap();
        session.handle(chunk(100, 1)).unwrap();
        assert_eq!(session.buffered_bytes(), 100);

        session
            .handle(SessionEvent::Detect {
                names: vec!["beta".to_string(), "alpha".to_string()],
            })
            .unwrap();

        assert_eq!(session.active_keyword(), Some("beta"));
        assert_eq!(session.buffered_bytes(), 0);
        assert_eq!(
            factory.created_keywords(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
    }

    #[test]
    fn test_unsupported_chunk_is_recoverable() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![1]));
        let mut session = session(registry(&dir, &["alpha.umdl"]), factory, "alpha");

        session.handle(start()).unwrap();
        let err = session
            .handle(SessionEvent::AudioChunk {
                format: AudioFormat { rate: 16000, width: 7, channels: 1 },
                timestamp: None,
                audio: vec![0; 14],
            })
            .unwrap_err();
        assert!(!err.is_fatal());

        assert_eq!(session.handle(chunk(WINDOW, 9)).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_selection_keeps_active_keyword() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let mut session = session(
            registry(&dir, &["alpha.umdl", "snowboy.umdl"]),
            factory.clone(),
            "snowboy",
        );

        session.handle(detect("alpha")).unwrap();
        session.handle(start()).unwrap();
        session.handle(chunk(100, 1)).unwrap();

        let events = session.handle(SessionEvent::Detect { names: Vec::new() }).unwrap();
        assert!(events.is_empty());
        assert_eq!(session.active_keyword(), Some("alpha"));
        assert_eq!(session.buffered_bytes(), 100);
        assert_eq!(factory.created_keywords(), vec!["alpha".to_string()]);
    }

    #[test]
    fn test_empty_selection_leaves_default_for_first_audio() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let mut session = session(registry(&dir, &["snowboy.umdl"]), factory.clone(), "snowboy");

        session.handle(SessionEvent::Detect { names: Vec::new() }).unwrap();
        assert_eq!(session.active_keyword(), None);
        assert!(factory.created_keywords().is_empty());

        session.handle(chunk(WINDOW, 1)).unwrap();
        assert_eq!(session.active_keyword(), Some("snowboy"));
    }

    #[test]
    fn test_detector_load_failure_on_selection_is_recoverable() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![1]).failing_for(&["beta"]));
        let mut session = session(
            registry(&dir, &["alpha.umdl", "beta.umdl"]),
            factory.clone(),
            "alpha",
        );

        session.handle(detect("alpha")).unwrap();
        let err = session.handle(detect("beta")).unwrap_err();
        assert!(matches!(err, WakeError::DetectorLoad { ref keyword, .. } if keyword == "beta"));
        assert!(!err.is_fatal());
        assert_eq!(session.active_keyword(), Some("alpha"));

        session.handle(start()).unwrap();
        assert_eq!(
            session.handle(chunk(WINDOW, 7)).unwrap(),
            vec![WakeEvent::Detection {
                name: "alpha".to_string(),
                timestamp: Some(7),
            }]
        );
    }

    #[test]
    fn test_detector_load_failure_on_default_is_fatal() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![]).failing_for(&["snowboy"]));
        let mut session = session(registry(&dir, &["snowboy.umdl"]), factory, "snowboy");

        session.handle(start()).unwrap();
        let err = session.handle(chunk(WINDOW, 1)).unwrap_err();
        assert!(matches!(
            err,
            WakeError::MalformedEventSequence { ref keyword, ref reason }
                if keyword == "snowboy" && reason.contains("scripted failure")
        ));
        assert!(err.is_fatal());
        assert_eq!(session.active_keyword(), None);
        assert_eq!(session.buffered_bytes(), 0);
    }

    #[test]
    fn test_describe_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let mut session = session(registry(&dir, &["alpha.umdl"]), factory, "alpha");

        let first = session.handle(SessionEvent::Describe).unwrap();
        let second = session.handle(SessionEvent::Describe).unwrap();
        assert_eq!(first, second);
        assert!(matches!(&first[0], WakeEvent::Info(info) if info.model_count() == 1));
    }
}
