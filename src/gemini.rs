//! Gemini Live API module
//!
//! Wire types, configuration and errors for the Gemini Live WebSocket protocol.
//! The client itself lives in [`crate::gemini_client`].

use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::media_event::MediaItem;

/// Endpoint of the bidirectional streaming API
pub const LIVE_API_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default Live model
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// The relay only consumes text replies
pub const RESPONSE_MODALITY: &str = "TEXT";

/// Generation configuration for setup.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_resolution: Option<String>,
}

/// Session resumption request; an empty handle asks for a fresh session
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

/// Session setup message.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentSetup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_resumption: Option<SessionResumptionConfig>,
}

/// A role-tagged list of parts
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Base64 media payload with its MIME type
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Turn-based content sent by the client
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

impl ClientContent {
    /// A complete user turn carrying one media item.
    pub fn media_turn(item: &MediaItem) -> Self {
        Self {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: None,
                    inline_data: Some(Blob {
                        mime_type: item.mime_type().to_string(),
                        data: general_purpose::STANDARD.encode(item.bytes()),
                    }),
                }],
            }],
            turn_complete: true,
        }
    }
}

/// Message sent from client to server.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    ClientContent(ClientContent),
}

/// Server -> client messages
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    SetupComplete {
        #[serde(rename = "setupComplete")]
        setup_complete: serde_json::Value,
    },
    ServerContent {
        #[serde(rename = "serverContent")]
        server_content: serde_json::Value,
    },
    GoAway {
        #[serde(rename = "goAway")]
        go_away: serde_json::Value,
    },
    SessionResumptionUpdate {
        #[serde(rename = "sessionResumptionUpdate")]
        session_resumption_update: serde_json::Value,
    },
    /// Anything else (usage metadata, tool calls) is not used here
    Other(serde_json::Value),
}

/// Error type for Gemini API operations
#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No API key configured")]
    MissingApiKey,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Setup not complete")]
    SetupNotComplete,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout")]
    Timeout,

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, GeminiError>;

/// Response from the Gemini API
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// Setup has been completed
    SetupComplete,

    /// Text fragment of the model's reply
    TextResponse(String),

    /// The model finished its reply to the current turn
    TurnComplete,

    /// Server will disconnect soon
    GoAway,

    /// Session resumption token provided
    SessionResumptionUpdate(String),
}

/// Configuration for the Gemini client
#[derive(Debug, Clone)]
pub struct GeminiClientConfig {
    pub url: String,
    pub model: String,
    pub system_instruction: Option<String>,
    pub temperature: Option<f32>,
    pub media_resolution: Option<MediaResolution>,
    pub setup_timeout: Duration,
}

impl Default for GeminiClientConfig {
    fn default() -> Self {
        Self {
            url: LIVE_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_instruction: None,
            temperature: Some(0.2),
            media_resolution: Some(MediaResolution::Medium),
            setup_timeout: Duration::from_secs(10),
        }
    }
}

/// Media resolution options for video input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaResolution {
    Low,
    Medium,
    High,
}

impl MediaResolution {
    /// Parse `low`, `medium` or `high`, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "MEDIA_RESOLUTION_LOW",
            Self::Medium => "MEDIA_RESOLUTION_MEDIUM",
            Self::High => "MEDIA_RESOLUTION_HIGH",
        }
    }
}

/// Parse one server frame and forward what the relay cares about.
pub(crate) async fn handle_text_message(
    text: &str,
    response_tx: &mpsc::Sender<Result<ApiResponse>>,
) -> Result<()> {
    let server_message = serde_json::from_str::<ServerMessage>(text)?;

    let response = match server_message {
        ServerMessage::SetupComplete { .. } => ApiResponse::SetupComplete,
        ServerMessage::ServerContent { server_content } => {
            return handle_server_content(server_content, response_tx).await;
        }
        ServerMessage::GoAway { go_away } => {
            tracing::info!("Server sent goAway: {}", go_away);
            ApiResponse::GoAway
        }
        ServerMessage::SessionResumptionUpdate {
            session_resumption_update,
        } => {
            let resumable = session_resumption_update
                .get("resumable")
                .and_then(|r| r.as_bool())
                .unwrap_or(true);
            match session_resumption_update["newHandle"].as_str() {
                Some(handle) if resumable && !handle.is_empty() => {
                    ApiResponse::SessionResumptionUpdate(handle.to_string())
                }
                _ => return Ok(()),
            }
        }
        ServerMessage::Other(value) => {
            tracing::debug!("Ignoring server message: {}", value);
            return Ok(());
        }
    };

    response_tx
        .send(Ok(response))
        .await
        .map_err(|_| GeminiError::ChannelClosed)
}

/// Process server content messages which can carry text parts and turn markers.
pub(crate) async fn handle_server_content(
    content: serde_json::Value,
    response_tx: &mpsc::Sender<Result<ApiResponse>>,
) -> Result<()> {
    if let Some(model_turn) = content.get("modelTurn") {
        match model_turn.get("parts").and_then(|p| p.as_array()) {
            Some(parts) => {
                for text in parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                    .filter(|text| !text.is_empty())
                {
                    response_tx
                        .send(Ok(ApiResponse::TextResponse(text.to_string())))
                        .await
                        .map_err(|_| GeminiError::ChannelClosed)?;
                }
            }
            None => {
                tracing::warn!("Received model turn without parts array: {:?}", model_turn);
            }
        }
    }

    let turn_complete = content
        .get("turnComplete")
        .and_then(|t| t.as_bool())
        .unwrap_or(false);
    if turn_complete {
        response_tx
            .send(Ok(ApiResponse::TurnComplete))
            .await
            .map_err(|_| GeminiError::ChannelClosed)?;
    }

    Ok(())
}
