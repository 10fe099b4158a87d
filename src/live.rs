//! Live API wire protocol types
//!
//! Envelope types for the vendor's bidirectional streaming protocol
//! (`setup` / `clientContent` / `realtimeInput` / `serverContent` /
//! `toolCall`). The schema is vendor-defined; these types mirror it
//! exactly and are validated once, at the parse boundary.

use crate::media::MediaChunk;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Error as WsError;

/// Generation configuration sent inside the setup envelope.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// One part of a content turn.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A content turn (role + parts), used for system instructions and text turns.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

/// Session setup message.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LiveSetup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

/// A batch of realtime media chunks. The client sends one envelope per
/// chunk, so in practice `media_chunks` holds a single element.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

/// Message sent from client to server.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Setup(LiveSetup),
    ClientContent(serde_json::Value),
    RealtimeInput(RealtimeInput),
    ToolResponse(serde_json::Value),
}

impl ClientMessage {
    /// Serialize with the vendor's top-level envelope key.
    pub fn to_wire(&self) -> Result<String> {
        let json = match self {
            ClientMessage::Setup(setup) => {
                format!("{{\"setup\":{}}}", serde_json::to_string(setup)?)
            }
            ClientMessage::ClientContent(content) => {
                format!("{{\"clientContent\":{}}}", serde_json::to_string(content)?)
            }
            ClientMessage::RealtimeInput(input) => {
                format!("{{\"realtimeInput\":{}}}", serde_json::to_string(input)?)
            }
            ClientMessage::ToolResponse(resp) => {
                format!("{{\"toolResponse\":{}}}", serde_json::to_string(resp)?)
            }
        };
        Ok(json)
    }
}

/// Inline base64 media inside a model turn part.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: String,
}

/// One part of a streamed model turn: text or inline audio.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelPart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<ModelPart>,
}

/// `serverContent` payload: streamed model output plus turn signals.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub turn_complete: bool,
    pub interrupted: bool,
    pub generation_complete: bool,
}

/// Server -> client messages. Anything that doesn't match a known
/// envelope key lands in `Unknown` instead of failing the parse.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    SetupComplete {
        #[serde(rename = "setupComplete")]
        setup_complete: serde_json::Value,
    },
    ServerContent {
        #[serde(rename = "serverContent")]
        server_content: ServerContent,
    },
    ToolCall {
        #[serde(rename = "toolCall")]
        tool_call: serde_json::Value,
    },
    Unknown(serde_json::Value),
}

/// Error type for Live API operations.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Setup not complete")]
    SetupNotComplete,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, LiveError>;

/// Response modality options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Text,
    Audio,
}

impl ResponseModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Audio => "AUDIO",
        }
    }
}

/// Connection status of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Explicit client configuration. There is no module-level API key or
/// singleton; everything the client needs is passed in here.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub url: String,
    pub model: String,
    pub system_instruction: Option<String>,
    pub temperature: Option<f32>,
    pub response_modalities: Vec<ResponseModality>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            model: "models/gemini-2.0-flash-live-001".to_string(),
            system_instruction: None,
            temperature: Some(0.7),
            response_modalities: vec![ResponseModality::Text],
        }
    }
}

impl LiveConfig {
    /// Build a config pointing at the public Live API endpoint.
    pub fn from_api_key(api_key: &str) -> Self {
        Self {
            url: format!(
                "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent?key={}",
                api_key
            ),
            ..Default::default()
        }
    }

    pub(crate) fn setup_message(&self) -> LiveSetup {
        LiveSetup {
            model: self.model.clone(),
            generation_config: Some(GenerationConfig {
                response_modalities: self
                    .response_modalities
                    .iter()
                    .map(|m| m.as_str().to_string())
                    .collect(),
                temperature: self.temperature,
            }),
            system_instruction: self.system_instruction.as_ref().map(|text| Content {
                role: Some("SYSTEM".to_string()),
                parts: vec![Part {
                    text: Some(text.clone()),
                }],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_envelope_serialization() {
        let config = LiveConfig {
            model: "models/gemini-2.0-flash-live-001".to_string(),
            system_instruction: Some("You are a cooking assistant.".to_string()),
            temperature: Some(0.7),
            response_modalities: vec![ResponseModality::Text],
            ..Default::default()
        };

        let wire = ClientMessage::Setup(config.setup_message()).to_wire().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&wire).unwrap();

        assert_eq!(parsed["setup"]["model"], "models/gemini-2.0-flash-live-001");
        assert_eq!(
            parsed["setup"]["systemInstruction"]["parts"][0]["text"],
            "You are a cooking assistant."
        );
        assert_eq!(parsed["setup"]["generationConfig"]["responseModalities"][0], "TEXT");
        assert_eq!(parsed["setup"]["generationConfig"]["temperature"], 0.7);
    }

    #[test]
    fn realtime_input_envelope_serialization() {
        let chunk = MediaChunk::from_bytes("audio/pcm;rate=16000", &[1u8, 2, 3]);
        let wire = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![chunk],
        })
        .to_wire()
        .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&wire).unwrap();

        let chunks = &parsed["realtimeInput"]["mediaChunks"];
        assert_eq!(chunks[0]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunks[0]["data"], "AQID");
    }

    #[test]
    fn server_message_deserialization() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
        assert!(matches!(msg, ServerMessage::SetupComplete { .. }));

        let msg: ServerMessage = serde_json::from_str(
            r#"{"serverContent": {"modelTurn": {"parts": [{"text": "hi"}]}, "turnComplete": true}}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::ServerContent { server_content } => {
                assert!(server_content.turn_complete);
                let parts = &server_content.model_turn.as_ref().unwrap().parts;
                assert_eq!(parts[0].text.as_deref(), Some("hi"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let msg: ServerMessage =
            serde_json::from_str(r#"{"toolCall": {"id": "123"}}"#).unwrap();
        match msg {
            ServerMessage::ToolCall { tool_call } => assert_eq!(tool_call["id"], "123"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unrecognized_envelope_parses_as_unknown() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"usageMetadata": {"totalTokenCount": 5}}"#).unwrap();
        match msg {
            ServerMessage::Unknown(value) => {
                assert_eq!(value["usageMetadata"]["totalTokenCount"], 5);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn interrupted_flag_deserializes() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent": {"interrupted": true}}"#).unwrap();
        match msg {
            ServerMessage::ServerContent { server_content } => {
                assert!(server_content.interrupted);
                assert!(server_content.model_turn.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
