//! # WebSocket Wake Word Transport
//!
//! Clients connect to `GET /ws` and speak a small event protocol. Each
//! connection is one actix actor owning one `WakeSession`, so the events of a
//! connection are handled strictly one after another.
//!
//! ## Message Format:
//! Text frames carry JSON events shaped `{"type": "...", "data": {...}}`.
//!
//! - **Client → Server**: `describe`, `detect`, `audio-start`, `audio-chunk`
//!   (header only, the PCM payload follows as the next binary frame), `audio-stop`
//! - **Server → Client**: `info`, `detection`, `not-detected`, `error`
//!
//! A binary frame with no pending `audio-chunk` header is treated as audio in
//! the format announced by the last `audio-start`.
//!
//! ## Connection Lifecycle:
//! 1. **Upgrade**: refused with 503 when `max_concurrent_sessions` are open
//! 2. **Heartbeat**: a ping every `heartbeat_interval_secs`; clients silent
//!    for `client_timeout_secs` are dropped
//! 3. **Errors**: reported as `error` events; fatal ones close the socket
//! 4. **Teardown**: the session and its detector handle are released

use crate::audio::converter::AudioFormat;
use crate::audio::session::{SessionEvent, WakeEvent, WakeSession};
use crate::error::AppError;
use crate::state::AppState;
use crate::wake::info::Info;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Events sent by clients.
///
/// Every variant carries a `data` object, possibly empty; `ClientMessage::parse`
/// fills in `{}` when a client leaves it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Capability query
    Describe {},

    /// Keyword selection; only the first name is used
    Detect {
        #[serde(default)]
        names: Vec<String>,
    },

    AudioStart {
        rate: u32,
        width: u16,
        channels: u16,
        #[serde(default)]
        timestamp: Option<u64>,
    },

    /// Header of the binary frame that follows
    AudioChunk {
        rate: u32,
        width: u16,
        channels: u16,
        #[serde(default)]
        timestamp: Option<u64>,
    },

    AudioStop {
        #[serde(default)]
        timestamp: Option<u64>,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl ClientMessage {
    /// Decode a text frame, accepting a missing or `null` `data` field.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let data = match envelope.data {
            Some(serde_json::Value::Null) | None => serde_json::json!({}),
            Some(data) => data,
        };
        serde_json::from_value(serde_json::json!({ "type": envelope.kind, "data": data }))
    }
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    Info(Info),
    Detection {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    NotDetected,
    Error {
        code: String,
        message: String,
    },
}

impl From<WakeEvent> for ServerMessage {
    fn from(event: WakeEvent) -> Self {
        match event {
            WakeEvent::Info(info) => ServerMessage::Info(info),
            WakeEvent::Detection { name, timestamp } => ServerMessage::Detection { name, timestamp },
            WakeEvent::NotDetected => ServerMessage::NotDetected,
        }
    }
}

/// Format and timestamp announced by an `audio-chunk` header.
#[derive(Debug, Clone, Copy)]
struct ChunkHeader {
    format: AudioFormat,
    timestamp: Option<u64>,
}

/// What the actor has to do after one inbound frame.
#[derive(Debug, Default, PartialEq)]
struct Reply {
    messages: Vec<ServerMessage>,
    close: Option<ws::CloseReason>,
}

/// Frame-level protocol state of one connection.
///
/// Pairs `audio-chunk` headers with their binary payloads, feeds the session
/// and decides when the socket has to close. Kept apart from the actor so the
/// frame rules can be exercised without a live socket.
struct Connection {
    state: AppState,
    session: WakeSession,

    /// Header waiting for its binary payload
    pending_chunk: Option<ChunkHeader>,

    /// Format of the last `audio-start`, used for header-less binary frames
    stream_format: AudioFormat,
}

impl Connection {
    fn new(state: AppState) -> Self {
        let config = state.get_config();
        let session = WakeSession::new(
            state.registry.clone(),
            state.detectors.clone(),
            config.keywords.default_keyword.clone(),
            config.audio.window_bytes(),
        );

        Self {
            state,
            session,
            pending_chunk: None,
            stream_format: AudioFormat::canonical(),
        }
    }

    fn client_id(&self) -> String {
        self.session.client_id().to_string()
    }

    fn error(&self, reply: &mut Reply, code: &str, message: String) {
        warn!(client_id = %self.client_id(), code, "WebSocket error: {}", message);
        reply.messages.push(ServerMessage::Error {
            code: code.to_string(),
            message,
        });
    }

    fn on_text(&mut self, text: &str) -> Reply {
        let mut reply = Reply::default();
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                self.error(&mut reply, "invalid_event", format!("Invalid event: {}", err));
                return reply;
            }
        };

        if self.pending_chunk.take().is_some() {
            warn!(client_id = %self.client_id(), "audio-chunk header without payload discarded");
        }

        match message {
            ClientMessage::Describe {} => self.dispatch(SessionEvent::Describe, &mut reply),
            ClientMessage::Detect { names } => {
                self.dispatch(SessionEvent::Detect { names }, &mut reply)
            }
            ClientMessage::AudioStart {
                rate,
                width,
                channels,
                timestamp,
            } => {
                let format = AudioFormat { rate, width, channels };
                self.stream_format = format;
                self.dispatch(SessionEvent::AudioStart { format, timestamp }, &mut reply);
            }
            ClientMessage::AudioChunk {
                rate,
                width,
                channels,
                timestamp,
            } => {
                self.pending_chunk = Some(ChunkHeader {
                    format: AudioFormat { rate, width, channels },
                    timestamp,
                });
            }
            ClientMessage::AudioStop { timestamp } => {
                debug!(client_id = %self.client_id(), ?timestamp, "audio-stop received");
                self.dispatch(SessionEvent::AudioStop, &mut reply);
                if reply.close.is_none() && self.state.get_config().server.close_after_stop {
                    reply.close = Some(ws::CloseCode::Normal.into());
                }
            }
        }

        reply
    }

    fn on_binary(&mut self, audio: Vec<u8>) -> Reply {
        let header = self.pending_chunk.take().unwrap_or(ChunkHeader {
            format: self.stream_format,
            timestamp: None,
        });

        let mut reply = Reply::default();
        self.dispatch(
            SessionEvent::AudioChunk {
                format: header.format,
                timestamp: header.timestamp,
                audio,
            },
            &mut reply,
        );
        reply
    }

    /// Run one event through the session and collect its output.
    fn dispatch(&mut self, event: SessionEvent, reply: &mut Reply) {
        let windows_before = self.session.stats().windows_scored;
        let result = self.session.handle(event);
        let windows_scored = self.session.stats().windows_scored - windows_before;
        if windows_scored > 0 {
            self.state.record_windows_scored(windows_scored);
        }

        match result {
            Ok(events) => {
                for event in events {
                    if matches!(event, WakeEvent::Detection { .. }) {
                        self.state.record_detections(1);
                    }
                    reply.messages.push(ServerMessage::from(event));
                }
            }
            Err(err) => {
                self.error(reply, err.code(), err.to_string());
                if err.is_fatal() {
                    error!(client_id = %self.client_id(), "Closing session: {}", err);
                    reply.close = Some(ws::CloseReason {
                        code: ws::CloseCode::Policy,
                        description: Some(err.code().to_string()),
                    });
                }
            }
        }
    }
}

/// One client connection.
pub struct WakeWebSocket {
    state: AppState,

    /// `None` once the actor has stopped
    connection: Option<Connection>,

    last_heartbeat: Instant,
}

impl WakeWebSocket {
    pub fn new(state: AppState) -> Self {
        Self {
            connection: Some(Connection::new(state.clone())),
            state,
            last_heartbeat: Instant::now(),
        }
    }

    fn client_id(&self) -> String {
        self.connection
            .as_ref()
            .map(Connection::client_id)
            .unwrap_or_default()
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("Failed to serialize outbound event: {}", err),
        }
    }

    fn apply(&self, reply: Reply, ctx: &mut ws::WebsocketContext<Self>) {
        for message in &reply.messages {
            self.send(ctx, message);
        }
        if let Some(reason) = reply.close {
            ctx.close(Some(reason));
            ctx.stop();
        }
    }
}

impl Actor for WakeWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(client_id = %self.client_id(), "WebSocket connection started");

        let server = &self.state.get_config().server;
        let interval = Duration::from_secs(server.heartbeat_interval_secs);
        let timeout = Duration::from_secs(server.client_timeout_secs);

        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(client_id = %act.client_id(), "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let client_id = self.client_id();
        self.connection = None;
        self.state.close_session();
        info!(client_id = %client_id, "WebSocket connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WakeWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                if let Some(reply) = self.connection.as_mut().map(|c| c.on_text(&text)) {
                    self.apply(reply, ctx);
                }
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                if let Some(reply) = self.connection.as_mut().map(|c| c.on_binary(data.to_vec())) {
                    self.apply(reply, ctx);
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(client_id = %self.client_id(), "WebSocket closed by client: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(client_id = %self.client_id(), "Fragmented frame refused");
                self.send(
                    ctx,
                    &ServerMessage::Error {
                        code: "unsupported_frame".to_string(),
                        message: "Fragmented frames are not supported".to_string(),
                    },
                );
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(client_id = %self.client_id(), "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// `GET /ws`: claim a session slot and upgrade the connection.
pub async fn wake_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let peer = req.connection_info().peer_addr().map(str::to_string);

    if !app_state.try_open_session() {
        warn!(?peer, "Refusing WebSocket connection, session limit reached");
        return Err(AppError::Unavailable(format!(
            "session limit of {} reached",
            app_state.get_config().performance.max_concurrent_sessions
        ))
        .into());
    }

    debug!(?peer, "Upgrading WebSocket connection");
    let actor = WakeWebSocket::new(app_state.get_ref().clone());

    ws::start(actor, &req, stream).map_err(|err| {
        // The actor never started, so its `stopped` hook will not run.
        app_state.close_session();
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::wake::detector::testing::ScriptedFactory;
    use crate::wake::registry::{KeywordDefaults, KeywordRegistry};
    use crate::wake::settings::SettingsTable;
    use actix_web::http::StatusCode;
    use actix_web::App;
    use std::sync::Arc;
    use tempfile::TempDir;

    const WINDOW: usize = 2048;

    #[test]
    fn test_parse_client_events() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"describe"}"#).unwrap(),
            ClientMessage::Describe {}
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"detect","data":{"names":["alexa","jarvis"]}}"#)
                .unwrap(),
            ClientMessage::Detect {
                names: vec!["alexa".to_string(), "jarvis".to_string()]
            }
        );
        assert_eq!(
            ClientMessage::parse(
                r#"{"type":"audio-chunk","data":{"rate":16000,"width":2,"channels":1,"timestamp":20}}"#
            )
            .unwrap(),
            ClientMessage::AudioChunk {
                rate: 16000,
                width: 2,
                channels: 1,
                timestamp: Some(20)
            }
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"audio-stop","data":null}"#).unwrap(),
            ClientMessage::AudioStop { timestamp: None }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_incomplete_events() {
        assert!(ClientMessage::parse(r#"{"type":"transcribe"}"#).is_err());
        assert!(ClientMessage::parse(r#"{"type":"audio-start","data":{"rate":16000}}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn test_server_event_wire_format() {
        let detection = ServerMessage::from(WakeEvent::Detection {
            name: "alpha".to_string(),
            timestamp: Some(20),
        });
        assert_eq!(
            serde_json::to_value(&detection).unwrap(),
            serde_json::json!({"type": "detection", "data": {"name": "alpha", "timestamp": 20}})
        );

        assert_eq!(
            serde_json::to_value(ServerMessage::NotDetected).unwrap(),
            serde_json::json!({"type": "not-detected"})
        );

        let error = ServerMessage::Error {
            code: "unknown_keyword".to_string(),
            message: "no keyword named 'x'".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("unknown_keyword"));
    }

    /// Connection over a temp model directory and a scripted detector.
    fn connection(
        dir: &TempDir,
        models: &[&str],
        script: Vec<i32>,
        close_after_stop: bool,
    ) -> Connection {
        for model in models {
            std::fs::write(dir.path().join(model), b"model").unwrap();
        }
        let registry = KeywordRegistry::new(
            vec![dir.path().to_path_buf()],
            dir.path().join("common.res"),
            SettingsTable::builtin().unwrap(),
            KeywordDefaults {
                sensitivity: 0.5,
                audio_gain: 1.0,
                apply_frontend: false,
            },
        );

        let mut config = AppConfig::default();
        config.server.close_after_stop = close_after_stop;
        let state = AppState::with_parts(config, registry, Arc::new(ScriptedFactory::new(script)));
        Connection::new(state)
    }

    fn detection(name: &str, timestamp: Option<u64>) -> ServerMessage {
        ServerMessage::Detection {
            name: name.to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_chunk_header_pairs_with_next_binary_frame() {
        let dir = TempDir::new().unwrap();
        let mut conn = connection(&dir, &["snowboy.umdl"], vec![1], false);

        let reply = conn.on_text(
            r#"{"type":"audio-chunk","data":{"rate":16000,"width":2,"channels":1,"timestamp":20}}"#,
        );
        assert_eq!(reply, Reply::default());

        let reply = conn.on_binary(vec![0; WINDOW]);
        assert_eq!(reply.messages, vec![detection("snowboy", Some(20))]);
        assert_eq!(reply.close, None);

        let metrics = conn.state.get_metrics_snapshot();
        assert_eq!(metrics.detections, 1);
        assert_eq!(metrics.windows_scored, 1);
    }

    #[test]
    fn test_headerless_binary_uses_audio_start_format() {
        let dir = TempDir::new().unwrap();
        let mut conn = connection(&dir, &["snowboy.umdl"], vec![1, 1], false);

        conn.on_text(r#"{"type":"audio-start","data":{"rate":16000,"width":2,"channels":2}}"#);

        // Stereo: 4096 bytes downmix to one window, not two.
        let reply = conn.on_binary(vec![0; WINDOW * 2]);
        assert_eq!(reply.messages, vec![detection("snowboy", None)]);
        assert_eq!(conn.state.get_metrics_snapshot().windows_scored, 1);
    }

    #[test]
    fn test_text_event_drops_pending_header() {
        let dir = TempDir::new().unwrap();
        let mut conn = connection(&dir, &["snowboy.umdl"], vec![0, 1], false);

        conn.on_text(
            r#"{"type":"audio-chunk","data":{"rate":16000,"width":2,"channels":2,"timestamp":5}}"#,
        );
        let reply = conn.on_text(r#"{"type":"describe"}"#);
        assert!(matches!(reply.messages.as_slice(), [ServerMessage::Info(_)]));

        // Canonical format and no timestamp: the stereo header is gone.
        let reply = conn.on_binary(vec![0; WINDOW * 2]);
        assert_eq!(reply.messages, vec![detection("snowboy", None)]);
        assert_eq!(conn.state.get_metrics_snapshot().windows_scored, 2);
    }

    #[test]
    fn test_close_after_stop() {
        let dir = TempDir::new().unwrap();
        let mut conn = connection(&dir, &["snowboy.umdl"], vec![], true);

        let reply = conn.on_text(r#"{"type":"audio-stop"}"#);
        assert_eq!(reply.messages, vec![ServerMessage::NotDetected]);
        assert_eq!(reply.close, Some(ws::CloseCode::Normal.into()));

        let dir = TempDir::new().unwrap();
        let mut conn = connection(&dir, &["snowboy.umdl"], vec![], false);
        let reply = conn.on_text(r#"{"type":"audio-stop"}"#);
        assert_eq!(reply.messages, vec![ServerMessage::NotDetected]);
        assert_eq!(reply.close, None);
    }

    #[test]
    fn test_missing_default_keyword_closes_with_policy() {
        let dir = TempDir::new().unwrap();
        let mut conn = connection(&dir, &["alpha.umdl"], vec![], false);

        let reply = conn.on_binary(vec![0; WINDOW]);
        assert!(matches!(
            reply.messages.as_slice(),
            [ServerMessage::Error { code, .. }] if code == "malformed_event_sequence"
        ));
        let close = reply.close.unwrap();
        assert_eq!(close.code, ws::CloseCode::Policy);
        assert_eq!(close.description.as_deref(), Some("malformed_event_sequence"));
    }

    #[test]
    fn test_recoverable_errors_keep_socket_open() {
        let dir = TempDir::new().unwrap();
        let mut conn = connection(&dir, &["alpha.umdl"], vec![], false);

        let reply = conn.on_text(r#"{"type":"detect","data":{"names":["hey_bob"]}}"#);
        assert!(matches!(
            reply.messages.as_slice(),
            [ServerMessage::Error { code, .. }] if code == "unknown_keyword"
        ));
        assert_eq!(reply.close, None);

        let reply = conn.on_text("not json");
        assert!(matches!(
            reply.messages.as_slice(),
            [ServerMessage::Error { code, .. }] if code == "invalid_event"
        ));
        assert_eq!(reply.close, None);
    }

    fn app_state(max_sessions: usize) -> AppState {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = max_sessions;
        AppState::new(config).unwrap()
    }

    #[actix_web::test]
    async fn test_upgrade_refused_when_full() {
        let state = app_state(1);
        assert!(state.try_open_session());

        let app = actix_web::test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws", web::get().to(wake_websocket)),
        )
        .await;

        let req = actix_web::test::TestRequest::get().uri("/ws").to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 1);
    }

    #[actix_web::test]
    async fn test_failed_handshake_releases_slot() {
        let state = app_state(1);

        let app = actix_web::test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws", web::get().to(wake_websocket)),
        )
        .await;

        // No upgrade headers: the handshake fails before an actor exists.
        let req = actix_web::test::TestRequest::get().uri("/ws").to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }
}
