//! Wire message shapes (§6). Grounded on `socket_messages.py`'s
//! `SocketJsonMessage`/`SocketMessage` family — every outbound message
//! carries `type`, `msg_id`, and `code` (default 200); inbound client
//! messages are just `welcome`, `audioend`, and `pong`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{EngineOptions, RequestedOptions, TranscriptResult};

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "welcome")]
    Welcome {
        #[serde(default)]
        data: RequestedOptions,
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        access_token: Option<String>,
        #[serde(default)]
        msg_id: Option<u64>,
    },
    #[serde(rename = "audioend")]
    AudioEnd {
        #[serde(default)]
        data: Value,
        #[serde(default)]
        msg_id: Option<u64>,
    },
    #[serde(rename = "pong")]
    Pong {
        #[serde(default)]
        msg_id: Option<u64>,
    },
}

#[derive(Debug, Serialize)]
pub struct WelcomeInfo {
    pub version: String,
    pub engine: String,
    pub models: Vec<String>,
    pub languages: Vec<String>,
    pub features: Vec<&'static str>,
    pub options: EngineOptions,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome {
        msg_id: u64,
        code: u16,
        info: WelcomeInfo,
    },
    #[serde(rename = "response")]
    Response {
        msg_id: u64,
        code: u16,
        response_to: String,
    },
    #[serde(rename = "result")]
    Result {
        msg_id: u64,
        code: u16,
        transcript: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        features: Option<serde_json::Map<String, Value>>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        alternatives: Vec<Value>,
    },
    #[serde(rename = "ping")]
    Ping { msg_id: u64, code: u16 },
    #[serde(rename = "error")]
    Error {
        msg_id: u64,
        code: u16,
        name: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn from_transcript(msg_id: u64, result: TranscriptResult) -> Self {
        let features = if result.features.is_empty() {
            None
        } else {
            Some(result.features.into_iter().collect())
        };
        ServerMessage::Result {
            msg_id,
            code: 200,
            transcript: result.text,
            is_final: result.is_final,
            confidence: Some(result.confidence),
            features,
            alternatives: result
                .alternatives
                .into_iter()
                .map(|a| serde_json::json!({"text": a.text, "confidence": a.confidence, "words": a.words}))
                .collect(),
        }
    }
}
