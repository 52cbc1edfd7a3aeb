//! `GET /ws`: the voice/chat WebSocket.
//!
//! Protocol:
//! - Client → Server JSON frames: `init`, `text`, `audio_meta`, `stop`.
//!   Binary frames after `audio_meta` carry audio; an empty binary frame
//!   ends the utterance.
//! - Server → Client: [`ServerFrame`] JSON frames, plus binary frames with
//!   the spoken reply after `complete`.
//!
//! One turn runs per session at a time. The connection keeps reading while
//! a turn streams, so `stop` takes effect immediately.

use axum::{
    Router,
    extract::State,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use jarvis_agent::{Coordinates, StreamEvent, TurnContext, TurnOutcome};
use jarvis_core::message::ConversationId;
use jarvis_core::voice::AudioInput;

use crate::api_v1::MessageDto;
use crate::{SharedState, TurnClaim};

pub const NOT_UNDERSTOOD: &str = "Sorry, I couldn't understand that.";
pub const ALREADY_GENERATING: &str = "A response is already being generated.";
pub const GENERATION_STOPPED: &str = "Generation stopped.";

const DEFAULT_AUDIO_FORMAT: &str = "webm";

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Init {
        #[serde(default)]
        session_id: Option<String>,
    },
    Text {
        text: String,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        coordinates: Option<Coordinates>,
    },
    AudioMeta {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        format: Option<String>,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        coordinates: Option<Coordinates>,
    },
    Stop,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    SessionInit { session_id: String, restored: bool },
    History { messages: Vec<MessageDto> },
    SessionUpdated { session_id: String, title: String },
    Transcription { text: String },
    Text { chunk: String },
    Thought { chunk: String },
    ToolCall { name: String, args: serde_json::Value },
    ToolResult { tool: String, content: String },
    Error { message: String },
    System { content: String },
    Complete,
}

impl ServerFrame {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<StreamEvent> for ServerFrame {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Response { text } => Self::Text { chunk: text },
            StreamEvent::Thought { text } => Self::Thought { chunk: text },
            StreamEvent::ToolCall { name, args, .. } => Self::ToolCall { name, args },
            StreamEvent::ToolResult { name, content, .. } => Self::ToolResult { tool: name, content },
            StreamEvent::Error { message } => Self::Error { message },
        }
    }
}

/// What the connection writes to the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(ServerFrame),
    Audio(Vec<u8>),
}

pub fn ws_router(state: SharedState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    info!("WebSocket connection established");
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(64);

    tokio::spawn(async move {
        while let Some(item) = out_rx.recv().await {
            let msg = match item {
                Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => WsMessage::Text(json.into()),
                    Err(e) => {
                        warn!(error = %e, "Unserializable frame dropped");
                        continue;
                    }
                },
                Outbound::Audio(bytes) => WsMessage::Binary(bytes.into()),
            };
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection::new(state, out_tx);
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => connection.on_text(text.as_str()).await,
            Ok(WsMessage::Binary(bytes)) => connection.on_binary(&bytes).await,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    connection.close();
    info!("WebSocket connection closed");
}

/// Audio collected between `audio_meta` and the terminating empty frame.
struct PendingAudio {
    format: String,
    language: Option<String>,
    bytes: Vec<u8>,
}

enum TurnInput {
    Text(String),
    Audio(AudioInput),
}

/// Everything a spawned turn needs to know about what it answers.
struct Turn {
    session: ConversationId,
    input: TurnInput,
    language: Option<String>,
    context: TurnContext,
}

/// Per-socket protocol state, independent of the transport.
pub struct Connection {
    state: SharedState,
    out: mpsc::Sender<Outbound>,
    session: Option<ConversationId>,
    audio: Option<PendingAudio>,
    turn: Option<CancellationToken>,
    /// Last location the client reported
    context: TurnContext,
}

impl Connection {
    pub fn new(state: SharedState, out: mpsc::Sender<Outbound>) -> Self {
        Self {
            state,
            out,
            session: None,
            audio: None,
            turn: None,
            context: TurnContext::default(),
        }
    }

    pub fn session(&self) -> Option<&ConversationId> {
        self.session.as_ref()
    }

    pub async fn on_text(&mut self, raw: &str) {
        let frame: ClientFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Unparseable client frame");
                self.send(ServerFrame::error(format!("Invalid message: {e}"))).await;
                return;
            }
        };

        if let ClientFrame::Init { session_id } = frame {
            self.init(session_id).await;
            return;
        }
        if self.session.is_none() {
            self.init(None).await;
        }

        match frame {
            ClientFrame::Init { .. } => {}
            ClientFrame::Text {
                text,
                language,
                location,
                coordinates,
            } => {
                self.context.update(location, coordinates);
                self.start_turn(TurnInput::Text(text), language).await;
            }
            ClientFrame::AudioMeta {
                language,
                format,
                location,
                coordinates,
            } => {
                debug!(?language, ?format, "Audio utterance started");
                self.context.update(location, coordinates);
                self.audio = Some(PendingAudio {
                    format: format.unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.into()),
                    language,
                    bytes: Vec::new(),
                });
            }
            ClientFrame::Stop => {
                if let Some(token) = &self.turn {
                    info!("Stop requested");
                    token.cancel();
                }
            }
        }
    }

    pub async fn on_binary(&mut self, chunk: &[u8]) {
        if !chunk.is_empty() {
            match &mut self.audio {
                Some(pending) => pending.bytes.extend_from_slice(chunk),
                None => debug!(len = chunk.len(), "Audio without audio_meta ignored"),
            }
            return;
        }

        let Some(pending) = self.audio.take() else {
            return;
        };
        if pending.bytes.is_empty() {
            return;
        }
        if self.session.is_none() {
            self.init(None).await;
        }

        let language = pending.language.clone();
        let audio = AudioInput {
            bytes: pending.bytes,
            format: pending.format,
            language: pending.language.or_else(|| self.state.default_language.clone()),
        };
        self.start_turn(TurnInput::Audio(audio), language).await;
    }

    /// Cancel whatever is running; the socket is gone.
    pub fn close(&mut self) {
        if let Some(token) = self.turn.take() {
            token.cancel();
        }
    }

    async fn init(&mut self, requested: Option<String>) {
        let store = self.state.store().clone();

        if let Some(id) = requested.map(ConversationId::from) {
            match store.get_session(&id).await {
                Ok(Some(_)) => match store.load_messages(&id).await {
                    Ok(messages) => {
                        info!(session_id = %id, messages = messages.len(), "Session restored");
                        self.session = Some(id.clone());
                        self.send(ServerFrame::SessionInit {
                            session_id: id.to_string(),
                            restored: true,
                        })
                        .await;
                        self.send(ServerFrame::History {
                            messages: messages.iter().map(MessageDto::from).collect(),
                        })
                        .await;
                        return;
                    }
                    Err(e) => {
                        self.send(ServerFrame::error(e.to_string())).await;
                        return;
                    }
                },
                Ok(None) => debug!(session_id = %id, "Unknown session requested, starting a new one"),
                Err(e) => {
                    self.send(ServerFrame::error(e.to_string())).await;
                    return;
                }
            }
        }

        match store.create_session(None).await {
            Ok(id) => {
                info!(session_id = %id, "Session created");
                self.session = Some(id.clone());
                self.send(ServerFrame::SessionInit {
                    session_id: id.to_string(),
                    restored: false,
                })
                .await;
            }
            Err(e) => self.send(ServerFrame::error(e.to_string())).await,
        }
    }

    async fn start_turn(&mut self, input: TurnInput, language: Option<String>) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let Some(claim) = self.state.claim(&session) else {
            self.send(ServerFrame::error(ALREADY_GENERATING)).await;
            return;
        };

        let cancel = CancellationToken::new();
        self.turn = Some(cancel.clone());
        let language = language.or_else(|| self.state.default_language.clone());

        let turn = Turn {
            session,
            input,
            language,
            context: self.context.clone(),
        };
        tokio::spawn(run_turn(self.state.clone(), turn, cancel, self.out.clone(), claim));
    }

    async fn send(&self, frame: ServerFrame) {
        let _ = self.out.send(Outbound::Frame(frame)).await;
    }
}

async fn run_turn(
    state: SharedState,
    turn: Turn,
    cancel: CancellationToken,
    out: mpsc::Sender<Outbound>,
    claim: TurnClaim,
) {
    let Turn {
        session,
        input,
        language,
        context,
    } = turn;
    let send = |frame: ServerFrame| {
        let out = out.clone();
        async move {
            let _ = out.send(Outbound::Frame(frame)).await;
        }
    };

    let text = match input {
        TurnInput::Text(text) => text,
        TurnInput::Audio(audio) => {
            let heard = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drop(claim);
                    send(ServerFrame::System { content: GENERATION_STOPPED.into() }).await;
                    return;
                }
                heard = state.voice.transcriber.transcribe(audio) => heard,
            };
            match heard {
                Ok(text) if !text.trim().is_empty() => {
                    send(ServerFrame::Transcription { text: text.clone() }).await;
                    text
                }
                Ok(_) => String::new(),
                Err(e) => {
                    warn!(error = %e, "Transcription failed");
                    String::new()
                }
            }
        }
    };

    if text.trim().is_empty() {
        drop(claim);
        send(ServerFrame::error(NOT_UNDERSTOOD)).await;
        return;
    }

    let (events_tx, mut events_rx) = mpsc::channel::<StreamEvent>(64);
    let forward = {
        let out = out.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if out.send(Outbound::Frame(event.into())).await.is_err() {
                    break;
                }
            }
        })
    };

    let report = state
        .runner
        .run_turn_in(&session, &text, &context, &cancel, &events_tx)
        .await;
    drop(events_tx);
    let _ = forward.await;
    drop(claim);

    let report = match report {
        Ok(report) => report,
        Err(e) => {
            warn!(session_id = %session, error = %e, "Turn could not run");
            send(ServerFrame::error(e.to_string())).await;
            return;
        }
    };

    if let Some(title) = report.new_title {
        send(ServerFrame::SessionUpdated {
            session_id: session.to_string(),
            title,
        })
        .await;
    }

    match report.outcome {
        TurnOutcome::Completed => {
            send(ServerFrame::Complete).await;
            if let Some(reply) = report.reply {
                speak(&state, &reply, language.as_deref(), &cancel, &out).await;
            }
        }
        TurnOutcome::Cancelled => {
            send(ServerFrame::System {
                content: GENERATION_STOPPED.into(),
            })
            .await;
        }
        TurnOutcome::Failed => {}
    }
}

/// Best-effort speech for a finished reply. Failures leave the reply text-only.
async fn speak(
    state: &SharedState,
    reply: &str,
    language: Option<&str>,
    cancel: &CancellationToken,
    out: &mpsc::Sender<Outbound>,
) {
    let audio = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        audio = state.voice.synthesizer.synthesize(reply, language) => audio,
    };
    match audio {
        Ok(bytes) if !bytes.is_empty() => {
            let _ = out.send(Outbound::Audio(bytes)).await;
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Speech synthesis failed, reply stays text-only"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{state_watching, state_with, state_with_voice};
    use async_trait::async_trait;
    use jarvis_agent::test_helpers::{Round, ScriptedProvider, done, text};
    use jarvis_core::error::VoiceError;
    use jarvis_core::message::Message;
    use jarvis_core::voice::{Synthesizer, Transcriber};
    use jarvis_voice::VoiceServices;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedTranscriber(&'static str);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn transcribe(&self, audio: AudioInput) -> Result<String, VoiceError> {
            assert!(!audio.bytes.is_empty());
            Ok(self.0.to_string())
        }
    }

    struct EchoSynthesizer;

    #[async_trait]
    impl Synthesizer for EchoSynthesizer {
        fn name(&self) -> &str {
            "echo"
        }

        async fn synthesize(&self, text: &str, _language: Option<&str>) -> Result<Vec<u8>, VoiceError> {
            Ok(text.as_bytes().to_vec())
        }
    }

    fn voice(heard: &'static str) -> VoiceServices {
        VoiceServices {
            transcriber: Arc::new(FixedTranscriber(heard)),
            synthesizer: Arc::new(EchoSynthesizer),
        }
    }

    fn slow_reply() -> ScriptedProvider {
        ScriptedProvider::new(vec![Round::Stream(vec![
            text("Thinking about it"),
            jarvis_agent::test_helpers::Step::Sleep(Duration::from_secs(5)),
            text(" forever"),
            done(),
        ])])
    }

    fn connect(state: SharedState) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(64);
        (Connection::new(state, tx), rx)
    }

    async fn next(rx: &mut mpsc::Receiver<Outbound>) -> Outbound {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no frame in time")
            .expect("channel closed")
    }

    async fn next_frame(rx: &mut mpsc::Receiver<Outbound>) -> ServerFrame {
        match next(rx).await {
            Outbound::Frame(frame) => frame,
            Outbound::Audio(_) => panic!("expected a JSON frame"),
        }
    }

    /// Frames up to and including the first one matching `last`.
    async fn frames_until(
        rx: &mut mpsc::Receiver<Outbound>,
        last: impl Fn(&ServerFrame) -> bool,
    ) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        loop {
            let frame = next_frame(rx).await;
            let stop = last(&frame);
            frames.push(frame);
            if stop {
                return frames;
            }
        }
    }

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"text","text":"hi"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Text {
                text: "hi".into(),
                language: None,
                location: None,
                coordinates: None,
            }
        );
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Stop);
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"audio_meta","language":"de","format":"wav"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::AudioMeta { format: Some(f), .. } if f == "wav"));
    }

    #[test]
    fn stream_events_map_to_wire_frames() {
        let frame: ServerFrame = StreamEvent::ToolResult {
            tool_call_id: "call_1".into(),
            name: "weather".into(),
            content: "Sunny".into(),
        }
        .into();
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "tool_result", "tool": "weather", "content": "Sunny"})
        );

        let frame: ServerFrame = StreamEvent::Response { text: "Hi".into() }.into();
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            serde_json::json!({"type": "text", "chunk": "Hi"})
        );
        assert_eq!(
            serde_json::to_value(ServerFrame::Complete).unwrap(),
            serde_json::json!({"type": "complete"})
        );
    }

    #[tokio::test]
    async fn text_turn_streams_and_completes() {
        let state = state_with(ScriptedProvider::replies(&["Hello there."]));
        let (mut conn, mut rx) = connect(state.clone());

        conn.on_text(r#"{"type":"init"}"#).await;
        let ServerFrame::SessionInit { session_id, restored } = next_frame(&mut rx).await else {
            panic!("expected session_init");
        };
        assert!(!restored);

        conn.on_text(r#"{"type":"text","text":"Hi Jarvis"}"#).await;
        let frames = frames_until(&mut rx, |f| *f == ServerFrame::Complete).await;
        assert_eq!(
            frames,
            vec![
                ServerFrame::Text {
                    chunk: "Hello there.".into()
                },
                ServerFrame::SessionUpdated {
                    session_id: session_id.clone(),
                    title: "Hi Jarvis".into()
                },
                ServerFrame::Complete,
            ]
        );

        let stored = state
            .store()
            .load_messages(&ConversationId::from(session_id))
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn reported_location_reaches_the_model() {
        let provider = Arc::new(ScriptedProvider::replies(&["It's sunny.", "Still sunny."]));
        let (mut conn, mut rx) = connect(state_watching(provider.clone(), VoiceServices::disabled()));

        conn.on_text(
            r#"{"type":"text","text":"Weather?","location":"Berlin, Germany","coordinates":{"lat":52.52,"lon":13.4}}"#,
        )
        .await;
        frames_until(&mut rx, |f| *f == ServerFrame::Complete).await;

        // Later frames without a location keep the last one reported.
        conn.on_text(r#"{"type":"text","text":"And now?"}"#).await;
        frames_until(&mut rx, |f| *f == ServerFrame::Complete).await;

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert!(
                request.messages[0]
                    .content
                    .contains("The user is currently in Berlin, Germany (latitude 52.52, longitude 13.4).")
            );
        }
        let stored = conn.state.store().load_messages(conn.session().unwrap()).await.unwrap();
        assert!(stored.iter().all(|m| !m.content.contains("Berlin")));
    }

    #[test]
    fn audio_meta_carries_location() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"audio_meta","format":"wav","location":"Oslo","coordinates":{"latitude":59.9,"longitude":10.7}}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::AudioMeta {
                language: None,
                format: Some("wav".into()),
                location: Some("Oslo".into()),
                coordinates: Some(Coordinates { lat: 59.9, lon: 10.7 }),
            }
        );
    }

    #[tokio::test]
    async fn first_frame_initializes_implicitly() {
        let (mut conn, mut rx) = connect(state_with(ScriptedProvider::replies(&["ok"])));
        conn.on_text(r#"{"type":"text","text":"hello"}"#).await;
        assert!(matches!(
            next_frame(&mut rx).await,
            ServerFrame::SessionInit { restored: false, .. }
        ));
        assert!(conn.session().is_some());
    }

    #[tokio::test]
    async fn init_restores_history() {
        let state = state_with(ScriptedProvider::replies(&[]));
        let id = state.store().create_session(Some("Old")).await.unwrap();
        state.store().append_message(&id, &Message::user("ping")).await.unwrap();
        state.store().append_message(&id, &Message::assistant("pong")).await.unwrap();

        let (mut conn, mut rx) = connect(state);
        conn.on_text(&format!(r#"{{"type":"init","session_id":"{id}"}}"#)).await;
        assert_eq!(
            next_frame(&mut rx).await,
            ServerFrame::SessionInit {
                session_id: id.to_string(),
                restored: true
            }
        );
        let ServerFrame::History { messages } = next_frame(&mut rx).await else {
            panic!("expected history");
        };
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "pong");
    }

    #[tokio::test]
    async fn unknown_session_starts_fresh() {
        let (mut conn, mut rx) = connect(state_with(ScriptedProvider::replies(&[])));
        conn.on_text(r#"{"type":"init","session_id":"gone"}"#).await;
        let ServerFrame::SessionInit { session_id, restored } = next_frame(&mut rx).await else {
            panic!("expected session_init");
        };
        assert!(!restored);
        assert_ne!(session_id, "gone");
    }

    #[tokio::test]
    async fn tool_events_reach_the_client() {
        let state = state_with(ScriptedProvider::replies(&[
            r#"<tool_call>{"name":"fast","arguments":{"n":1}}</tool_call>"#,
            "Done.",
        ]));
        let (mut conn, mut rx) = connect(state);
        conn.on_text(r#"{"type":"text","text":"run it"}"#).await;
        let frames = frames_until(&mut rx, |f| *f == ServerFrame::Complete).await;

        assert!(frames.contains(&ServerFrame::ToolCall {
            name: "fast".into(),
            args: serde_json::json!({"n": 1}),
        }));
        assert!(frames.contains(&ServerFrame::ToolResult {
            tool: "fast".into(),
            content: "fast done".into(),
        }));
    }

    #[tokio::test]
    async fn second_input_while_generating_is_rejected() {
        let (mut conn, mut rx) = connect(state_with(slow_reply()));
        conn.on_text(r#"{"type":"text","text":"first"}"#).await;
        next_frame(&mut rx).await; // session_init

        conn.on_text(r#"{"type":"text","text":"second"}"#).await;
        let frames = frames_until(&mut rx, |f| matches!(f, ServerFrame::Error { .. })).await;
        assert_eq!(frames.last(), Some(&ServerFrame::error(ALREADY_GENERATING)));
        conn.close();
    }

    #[tokio::test]
    async fn stop_cancels_the_turn() {
        let state = state_with(slow_reply());
        let (mut conn, mut rx) = connect(state.clone());
        conn.on_text(r#"{"type":"text","text":"go"}"#).await;
        next_frame(&mut rx).await; // session_init
        assert_eq!(
            next_frame(&mut rx).await,
            ServerFrame::Text {
                chunk: "Thinking about it".into()
            }
        );

        conn.on_text(r#"{"type":"stop"}"#).await;
        let frames = frames_until(&mut rx, |f| matches!(f, ServerFrame::System { .. })).await;
        assert_eq!(
            frames.last(),
            Some(&ServerFrame::System {
                content: GENERATION_STOPPED.into()
            })
        );

        // Only the user message survives the cancelled turn.
        let id = conn.session().unwrap().clone();
        assert_eq!(state.store().load_messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audio_utterance_is_transcribed_and_spoken() {
        let state = state_with_voice(ScriptedProvider::replies(&["It is noon."]), voice("what time is it"));
        let (mut conn, mut rx) = connect(state);

        conn.on_text(r#"{"type":"audio_meta","language":"en","format":"wav"}"#).await;
        next_frame(&mut rx).await; // session_init
        conn.on_binary(&[1u8; 4000]).await;
        conn.on_binary(&[]).await;

        assert_eq!(
            next_frame(&mut rx).await,
            ServerFrame::Transcription {
                text: "what time is it".into()
            }
        );
        frames_until(&mut rx, |f| *f == ServerFrame::Complete).await;
        assert_eq!(next(&mut rx).await, Outbound::Audio(b"It is noon.".to_vec()));
    }

    #[tokio::test]
    async fn empty_transcription_is_reported() {
        let provider = ScriptedProvider::replies(&["unused"]);
        let state = state_with_voice(provider, voice("   "));
        let (mut conn, mut rx) = connect(state.clone());

        conn.on_text(r#"{"type":"audio_meta"}"#).await;
        next_frame(&mut rx).await; // session_init
        conn.on_binary(&[7u8; 10]).await;
        conn.on_binary(&[]).await;

        assert_eq!(next_frame(&mut rx).await, ServerFrame::error(NOT_UNDERSTOOD));
        let id = conn.session().unwrap().clone();
        assert!(state.store().load_messages(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_json_gets_an_error_frame() {
        let (mut conn, mut rx) = connect(state_with(ScriptedProvider::replies(&[])));
        conn.on_text("not json").await;
        assert!(matches!(
            next_frame(&mut rx).await,
            ServerFrame::Error { message } if message.starts_with("Invalid message")
        ));
    }
}
