//! Realtime live session client.
//!
//! Owns one bidirectional WebSocket connection to the generative service
//! and translates between the UI-facing event model and the vendor wire
//! protocol: outbound media/text chunks are wrapped in envelopes, inbound
//! frames are demultiplexed into audio buffers, text fragments, detected
//! ingredients, and tool calls. Reading happens on a background task with
//! the write half shared behind a lock; inbound frames are processed in
//! arrival order.
//!
//! There is no reconnection or retry: a failed connect or an unexpected
//! close leaves the client disconnected and the caller decides whether to
//! call `connect` again.

use crate::detect::{extract_ingredients, IngredientHit, IngredientSet};
use crate::live::{
    ClientMessage, ConnectionStatus, LiveConfig, LiveError, RealtimeInput, Result, ServerContent,
    ServerMessage,
};
use crate::logbuf::StreamingLog;
use crate::media::MediaChunk;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Write half of the socket, shared with send callers.
type WsSink = Arc<
    Mutex<
        futures_util::stream::SplitSink<
            tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
            Message,
        >,
    >,
>;

type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Fixed wait for the server's setup acknowledgment. No retry.
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Typed events emitted by the client, in arrival order.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Server acknowledged the setup envelope.
    Ready,
    /// Generation was cancelled server-side mid-turn.
    Interrupted,
    /// The current response turn is complete.
    TurnComplete,
    /// One decoded inline-audio part (raw PCM).
    Audio(Vec<u8>),
    /// Concatenated text parts of one server message.
    Text(String),
    /// Newly detected ingredients (already deduplicated).
    Ingredients(Vec<IngredientHit>),
    /// Tool call payload, passed through verbatim.
    ToolCall(serde_json::Value),
    /// Connection-level error, surfaced as a single string.
    Error(String),
    /// The socket closed; the caller must reconnect explicitly.
    Closed,
}

pub struct LiveClient {
    config: LiveConfig,
    /// Shared with the reader task, which resets it to `Disconnected`
    /// when the socket closes unexpectedly so a later `connect()` is
    /// accepted again.
    status: Arc<StdMutex<ConnectionStatus>>,
    log: StreamingLog,
    ws_writer: Option<WsSink>,
    events: Option<mpsc::Receiver<LiveEvent>>,
    ingredients: Arc<StdMutex<IngredientSet>>,
    reader_task: Option<JoinHandle<()>>,
}

impl LiveClient {
    pub fn new(config: LiveConfig, log: StreamingLog) -> Self {
        Self {
            config,
            status: Arc::new(StdMutex::new(ConnectionStatus::Disconnected)),
            log,
            ws_writer: None,
            events: None,
            ingredients: Arc::new(StdMutex::new(IngredientSet::new())),
            reader_task: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.lock().map(|status| *status).unwrap_or_default()
    }

    fn set_status(&self, status: ConnectionStatus) {
        if let Ok(mut guard) = self.status.lock() {
            *guard = status;
        }
    }

    /// Open the socket, send the setup envelope, and wait for the
    /// server's acknowledgment.
    ///
    /// Returns false without side effects while already connecting or
    /// connected, and false (back in the disconnected state) on any
    /// error or on setup timeout.
    pub async fn connect(&mut self) -> bool {
        let status = self.status();
        if status != ConnectionStatus::Disconnected {
            warn!("connect rejected: session is {:?}", status);
            self.log
                .warning("connect ignored: already connecting or connected");
            return false;
        }

        // Drop leftovers from a previous session that died on the wire.
        self.teardown();
        self.set_status(ConnectionStatus::Connecting);
        match self.try_connect().await {
            Ok(()) => {
                // The reader may already have seen a close; don't undo
                // its disconnected mark.
                if let Ok(mut guard) = self.status.lock() {
                    if *guard == ConnectionStatus::Connecting {
                        *guard = ConnectionStatus::Connected;
                    }
                }
                info!("live session ready (model {})", self.config.model);
                self.log.info("session ready");
                true
            }
            Err(e) => {
                error!("connect failed: {e}");
                self.log.error(format!("connect failed: {e}"));
                self.teardown();
                self.set_status(ConnectionStatus::Disconnected);
                false
            }
        }
    }

    async fn try_connect(&mut self) -> Result<()> {
        info!("connecting live session for model {}", self.config.model);
        let (ws, _resp) = connect_async(&self.config.url).await?;
        let (sink, stream) = ws.split();
        self.ws_writer = Some(Arc::new(Mutex::new(sink)));

        let (event_tx, mut event_rx) = mpsc::channel(100);
        self.reader_task = Some(tokio::spawn(run_reader(
            stream,
            event_tx,
            self.status.clone(),
            self.ingredients.clone(),
            self.log.clone(),
        )));

        self.send(&ClientMessage::Setup(self.config.setup_message()))
            .await?;

        let ready = tokio::time::timeout(SETUP_TIMEOUT, async {
            while let Some(event) = event_rx.recv().await {
                match event {
                    LiveEvent::Ready => return true,
                    LiveEvent::Closed | LiveEvent::Error(_) => return false,
                    other => debug!("event before setup ack: {:?}", other),
                }
            }
            false
        })
        .await
        .map_err(|_| LiveError::Timeout)?;

        if !ready {
            return Err(LiveError::SetupNotComplete);
        }
        self.events = Some(event_rx);
        Ok(())
    }

    /// Close the socket and clear session-scoped state. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(writer) = self.ws_writer.take() {
            let mut guard = writer.lock().await;
            if let Err(e) = guard.close().await {
                debug!("error closing socket: {e}");
            }
        }
        self.teardown();
        if self.status() != ConnectionStatus::Disconnected {
            info!("live session disconnected");
            self.log.info("disconnected");
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn teardown(&mut self) {
        self.ws_writer = None;
        self.events = None;
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Ok(mut set) = self.ingredients.lock() {
            set.clear();
        }
    }

    /// Send media chunks, each wrapped in its own envelope. Requires a
    /// connected session; otherwise the chunks are dropped with a
    /// warning (not queued).
    pub async fn send_realtime_input(&mut self, chunks: &[MediaChunk]) -> bool {
        if self.status() != ConnectionStatus::Connected {
            warn!("dropping {} media chunk(s): not connected", chunks.len());
            self.log.warning(format!(
                "dropped {} media chunk(s): not connected",
                chunks.len()
            ));
            return false;
        }
        for chunk in chunks {
            let msg = ClientMessage::RealtimeInput(RealtimeInput {
                media_chunks: vec![chunk.clone()],
            });
            if let Err(e) = self.send(&msg).await {
                self.log.error(format!("media send failed: {e}"));
                return false;
            }
        }
        true
    }

    /// Send a single-turn user text message with the turn-complete flag
    /// set. Same not-connected semantics as media sends.
    pub async fn send_text_message(&mut self, text: &str) -> bool {
        if self.status() != ConnectionStatus::Connected {
            warn!("dropping text message: not connected");
            self.log.warning("dropped text message: not connected");
            return false;
        }
        let client_content = serde_json::json!({
            "turns": [{
                "role": "user",
                "parts": [{ "text": text }]
            }],
            "turnComplete": true
        });
        match self.send(&ClientMessage::ClientContent(client_content)).await {
            Ok(()) => true,
            Err(e) => {
                self.log.error(format!("text send failed: {e}"));
                false
            }
        }
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let wire = msg.to_wire()?;
        debug!("sending: {}", wire);
        let writer = self.ws_writer.as_ref().ok_or(LiveError::ConnectionClosed)?;
        let mut guard = writer.lock().await;
        guard.send(Message::text(wire)).await?;
        Ok(())
    }

    /// Take ownership of the inbound event stream. Available once per
    /// successful connect.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<LiveEvent>> {
        self.events.take()
    }

    /// Receive the next inbound event, if the stream hasn't been taken.
    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Ingredients detected so far this session.
    pub fn ingredients(&self) -> Vec<IngredientHit> {
        self.ingredients
            .lock()
            .map(|set| set.items().to_vec())
            .unwrap_or_default()
    }

    /// Clear the detected-ingredient accumulator without disconnecting.
    pub fn reset_ingredients(&mut self) {
        if let Ok(mut set) = self.ingredients.lock() {
            set.clear();
        }
    }
}

/// Reader task: demultiplex inbound frames until the socket closes,
/// then mark the session disconnected so `connect()` may be retried.
async fn run_reader(
    mut stream: WsStream,
    tx: mpsc::Sender<LiveEvent>,
    status: Arc<StdMutex<ConnectionStatus>>,
    ingredients: Arc<StdMutex<IngredientSet>>,
    log: StreamingLog,
) {
    debug!("reader task started");
    while let Some(message) = stream.next().await {
        let outcome = match message {
            Ok(Message::Text(text)) => handle_frame(&text, &tx, &ingredients, &log).await,
            Ok(Message::Binary(bytes)) => {
                // Some servers deliver JSON frames as binary.
                match std::str::from_utf8(&bytes) {
                    Ok(text) => handle_frame(text, &tx, &ingredients, &log).await,
                    Err(_) => {
                        debug!("ignoring non-UTF-8 binary frame ({} bytes)", bytes.len());
                        Ok(())
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                info!("server closed the connection: {:?}", frame);
                break;
            }
            Ok(_) => Ok(()), // ping/pong
            Err(e) => {
                error!("socket error: {e}");
                let _ = tx.send(LiveEvent::Error(e.to_string())).await;
                break;
            }
        };
        if outcome.is_err() {
            // Event receiver gone; nobody is listening anymore.
            break;
        }
    }
    if let Ok(mut guard) = status.lock() {
        *guard = ConnectionStatus::Disconnected;
    }
    let _ = tx.send(LiveEvent::Closed).await;
    debug!("reader task terminated");
}

/// Parse one inbound frame and emit the corresponding events. Malformed
/// JSON is logged and dropped; `Err` means the event channel closed.
async fn handle_frame(
    text: &str,
    tx: &mpsc::Sender<LiveEvent>,
    ingredients: &Arc<StdMutex<IngredientSet>>,
    log: &StreamingLog,
) -> std::result::Result<(), ()> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("malformed server message dropped: {e}");
            log.warning(format!("dropped malformed server message: {e}"));
            return Ok(());
        }
    };

    match message {
        ServerMessage::SetupComplete { setup_complete } => {
            debug!("setup complete: {}", setup_complete);
            tx.send(LiveEvent::Ready).await.map_err(|_| ())
        }
        ServerMessage::ToolCall { tool_call } => {
            tx.send(LiveEvent::ToolCall(tool_call)).await.map_err(|_| ())
        }
        ServerMessage::ServerContent { server_content } => {
            handle_server_content(server_content, tx, ingredients, log).await
        }
        ServerMessage::Unknown(value) => {
            // A known envelope key with an off-schema payload deserves a
            // visible warning; anything else is ignorable chatter.
            const ENVELOPE_KEYS: [&str; 3] = ["setupComplete", "serverContent", "toolCall"];
            let malformed_key = value
                .as_object()
                .and_then(|map| map.keys().find(|k| ENVELOPE_KEYS.contains(&k.as_str())));
            if let Some(key) = malformed_key {
                warn!("dropping schema-malformed {key} message");
                log.warning(format!("dropped schema-malformed {key} message"));
            } else {
                debug!("ignoring unrecognized server message: {}", value);
            }
            Ok(())
        }
    }
}

async fn handle_server_content(
    content: ServerContent,
    tx: &mpsc::Sender<LiveEvent>,
    ingredients: &Arc<StdMutex<IngredientSet>>,
    log: &StreamingLog,
) -> std::result::Result<(), ()> {
    if content.interrupted {
        debug!("generation interrupted server-side");
        // Anything bundled with the interruption is stale; drop it.
        return tx.send(LiveEvent::Interrupted).await.map_err(|_| ());
    }

    let mut text = String::new();
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(fragment) = part.text {
                text.push_str(&fragment);
            } else if let Some(inline) = part.inline_data {
                match STANDARD.decode(&inline.data) {
                    Ok(bytes) if !bytes.is_empty() => {
                        tx.send(LiveEvent::Audio(bytes)).await.map_err(|_| ())?;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log.warning(format!("dropped undecodable audio part: {e}"));
                    }
                }
            }
        }
    }

    if !text.is_empty() {
        let hits = extract_ingredients(&text);
        let new = ingredients
            .lock()
            .map(|mut set| set.insert_all(hits))
            .unwrap_or_default();
        tx.send(LiveEvent::Text(text)).await.map_err(|_| ())?;
        if !new.is_empty() {
            tx.send(LiveEvent::Ingredients(new)).await.map_err(|_| ())?;
        }
    }

    if content.turn_complete {
        tx.send(LiveEvent::TurnComplete).await.map_err(|_| ())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuf::LogKind;

    fn harness() -> (
        mpsc::Sender<LiveEvent>,
        mpsc::Receiver<LiveEvent>,
        Arc<StdMutex<IngredientSet>>,
        StreamingLog,
    ) {
        let (tx, rx) = mpsc::channel(32);
        (tx, rx, Arc::new(StdMutex::new(IngredientSet::new())), StreamingLog::new())
    }

    #[tokio::test]
    async fn setup_complete_emits_ready() {
        let (tx, mut rx, set, log) = harness();
        handle_frame(r#"{"setupComplete": {}}"#, &tx, &set, &log)
            .await
            .unwrap();
        assert!(matches!(rx.try_recv().unwrap(), LiveEvent::Ready));
    }

    #[tokio::test]
    async fn tool_call_passes_through_verbatim() {
        let (tx, mut rx, set, log) = harness();
        handle_frame(
            r#"{"toolCall": {"functionCalls": [{"name": "addToCookList"}]}}"#,
            &tx,
            &set,
            &log,
        )
        .await
        .unwrap();
        match rx.try_recv().unwrap() {
            LiveEvent::ToolCall(value) => {
                assert_eq!(value["functionCalls"][0]["name"], "addToCookList");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_json_is_logged_and_dropped() {
        let (tx, mut rx, set, log) = harness();
        handle_frame("{not json", &tx, &set, &log).await.unwrap();
        assert!(rx.try_recv().is_err());
        let entries = log.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, LogKind::Warning);
    }

    #[tokio::test]
    async fn unknown_envelope_is_ignored() {
        let (tx, mut rx, set, log) = harness();
        handle_frame(r#"{"usageMetadata": {"totalTokenCount": 9}}"#, &tx, &set, &log)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn off_schema_known_envelope_is_warned_and_dropped() {
        let (tx, mut rx, set, log) = harness();
        handle_frame(r#"{"serverContent": "garbage"}"#, &tx, &set, &log)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
        let entries = log.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, LogKind::Warning);
        assert!(entries[0].message.contains("serverContent"));
    }

    #[tokio::test]
    async fn model_turn_demultiplexes_audio_and_text_parts() {
        let (tx, mut rx, set, log) = harness();
        let audio = STANDARD.encode([1u8, 2, 3, 4]);
        let frame = serde_json::json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm", "data": audio}},
                        {"text": r#"Spotted produce: {"ingredients":[{"name":"Tomato","confidence":0.92,"category":"vegetable"}]}"#}
                    ]
                },
                "turnComplete": true
            }
        })
        .to_string();

        handle_frame(&frame, &tx, &set, &log).await.unwrap();

        match rx.try_recv().unwrap() {
            LiveEvent::Audio(bytes) => assert_eq!(bytes, vec![1, 2, 3, 4]),
            other => panic!("expected audio first, got {:?}", other),
        }
        match rx.try_recv().unwrap() {
            LiveEvent::Text(text) => assert!(text.contains("Spotted produce")),
            other => panic!("expected text, got {:?}", other),
        }
        match rx.try_recv().unwrap() {
            LiveEvent::Ingredients(hits) => {
                assert_eq!(hits.len(), 1);
                assert_eq!(hits[0].name, "Tomato");
            }
            other => panic!("expected ingredients, got {:?}", other),
        }
        assert!(matches!(rx.try_recv().unwrap(), LiveEvent::TurnComplete));
    }

    #[tokio::test]
    async fn text_parts_are_concatenated_before_extraction() {
        let (tx, mut rx, set, log) = harness();
        let frame = serde_json::json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"text": r#"{"ingredients": [{"na"#},
                        {"text": r#"me": "Basil"}]}"#}
                    ]
                }
            }
        })
        .to_string();

        handle_frame(&frame, &tx, &set, &log).await.unwrap();

        match rx.try_recv().unwrap() {
            LiveEvent::Text(text) => assert!(text.contains("Basil")),
            other => panic!("expected text, got {:?}", other),
        }
        match rx.try_recv().unwrap() {
            LiveEvent::Ingredients(hits) => assert_eq!(hits[0].name, "Basil"),
            other => panic!("expected ingredients, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn interruption_discards_bundled_parts() {
        let (tx, mut rx, set, log) = harness();
        let frame = serde_json::json!({
            "serverContent": {
                "interrupted": true,
                "modelTurn": {"parts": [{"text": "half-finished reply"}]}
            }
        })
        .to_string();

        handle_frame(&frame, &tx, &set, &log).await.unwrap();

        assert!(matches!(rx.try_recv().unwrap(), LiveEvent::Interrupted));
        assert!(rx.try_recv().is_err(), "no text after interruption");
    }

    #[tokio::test]
    async fn repeated_ingredients_emit_no_second_event() {
        let (tx, mut rx, set, log) = harness();
        let frame_for = |name: &str| {
            serde_json::json!({
                "serverContent": {
                    "modelTurn": {"parts": [
                        {"text": format!(r#"{{"ingredient":"{name}","confidence":0.8}}"#)}
                    ]}
                }
            })
            .to_string()
        };

        handle_frame(&frame_for("Tomato"), &tx, &set, &log).await.unwrap();
        handle_frame(&frame_for("tomato"), &tx, &set, &log).await.unwrap();

        let mut ingredient_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, LiveEvent::Ingredients(_)) {
                ingredient_events += 1;
            }
        }
        assert_eq!(ingredient_events, 1);
        assert_eq!(set.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn connect_guard_rejects_when_not_disconnected() {
        let mut client = LiveClient::new(LiveConfig::default(), StreamingLog::new());

        client.set_status(ConnectionStatus::Connecting);
        assert!(!client.connect().await);
        assert_eq!(client.status(), ConnectionStatus::Connecting);

        client.set_status(ConnectionStatus::Connected);
        assert!(!client.connect().await);
        assert_eq!(client.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn sends_while_disconnected_warn_and_drop() {
        let mut client = LiveClient::new(LiveConfig::default(), StreamingLog::new());

        assert!(!client.send_text_message("hello").await);
        assert!(!client.send_realtime_input(&[MediaChunk::pcm(&[0u8; 8])]).await);
        assert!(client.ws_writer.is_none(), "no socket write can have happened");

        let warnings: Vec<_> = client
            .log
            .snapshot()
            .into_iter()
            .filter(|e| e.kind == LogKind::Warning)
            .collect();
        assert_eq!(warnings.len(), 2);
    }

    /// Minimal live server: acks setup, closes the first connection
    /// immediately, and keeps the second one open.
    async fn spawn_flaky_server() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for connection in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                // The client's setup envelope arrives first.
                let _ = ws.next().await;
                ws.send(Message::text(r#"{"setupComplete": {}}"#))
                    .await
                    .unwrap();
                if connection == 0 {
                    let _ = ws.close(None).await;
                } else {
                    // Stay up until the client hangs up.
                    while let Some(Ok(_)) = ws.next().await {}
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn reconnect_is_accepted_after_unexpected_close() {
        let addr = spawn_flaky_server().await;
        let config = LiveConfig {
            url: format!("ws://{}", addr),
            ..Default::default()
        };
        let mut client = LiveClient::new(config, StreamingLog::new());

        assert!(client.connect().await);
        let mut events = client.take_events().unwrap();
        loop {
            match events.recv().await {
                Some(LiveEvent::Closed) | None => break,
                Some(_) => {}
            }
        }

        // The dead session must not wedge the connect guard.
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(client.connect().await);
        assert_eq!(client.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn disconnect_clears_ingredients_and_is_idempotent() {
        let mut client = LiveClient::new(LiveConfig::default(), StreamingLog::new());
        if let Ok(mut set) = client.ingredients.lock() {
            set.insert(IngredientHit {
                name: "Tomato".into(),
                confidence: None,
                category: None,
            });
        }

        client.disconnect().await;
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(client.ingredients().is_empty());

        // Second disconnect is a no-op.
        client.disconnect().await;
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }
}
