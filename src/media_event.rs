//! Media items received from the client and the envelope they arrive in

use base64::engine::general_purpose;
use base64::Engine;
use serde::Deserialize;

/// MIME type attached to audio submitted to the model
pub const AUDIO_MIME_TYPE: &str = "audio/webm";
/// MIME type attached to video frames submitted to the model
pub const VIDEO_MIME_TYPE: &str = "image/jpeg";

/// Kind of a media item, without its payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// One unit of media waiting to be submitted to the model
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaItem {
    /// Raw audio bytes exactly as the client sent them
    Audio(Vec<u8>),
    /// Decoded image bytes (JPEG)
    Video(Vec<u8>),
}

impl MediaItem {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Audio(_) => MediaKind::Audio,
            Self::Video(_) => MediaKind::Video,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Audio(_) => AUDIO_MIME_TYPE,
            Self::Video(_) => VIDEO_MIME_TYPE,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Audio(bytes) | Self::Video(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Parse a text frame carrying `{"type": "video", "data": <base64>}`.
    pub fn from_envelope(text: &str) -> Result<Self, FrameError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if envelope.kind != "video" {
            return Err(FrameError::UnsupportedType(envelope.kind));
        }
        let data = envelope.data.ok_or(FrameError::MissingData)?;
        let jpeg = general_purpose::STANDARD.decode(data.as_bytes())?;
        Ok(Self::Video(jpeg))
    }
}

/// Text frame envelope sent by the client
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<String>,
}

/// Reasons a text frame could not be turned into a media item
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported frame type: {0}")]
    UnsupportedType(String),

    #[error("envelope has no data field")]
    MissingData,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_envelope_is_decoded() {
        let data = general_purpose::STANDARD.encode([0xffu8, 0xd8, 0xff]);
        let text = serde_json::json!({"type": "video", "data": data}).to_string();

        let item = MediaItem::from_envelope(&text).unwrap();
        assert_eq!(item, MediaItem::Video(vec![0xff, 0xd8, 0xff]));
        assert_eq!(item.mime_type(), "image/jpeg");
        assert_eq!(item.kind(), MediaKind::Video);
    }

    #[test]
    fn test_bad_envelopes_are_rejected() {
        assert!(matches!(
            MediaItem::from_envelope("not json"),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            MediaItem::from_envelope(r#"{"type": "audio", "data": "AAAA"}"#),
            Err(FrameError::UnsupportedType(kind)) if kind == "audio"
        ));
        assert!(matches!(
            MediaItem::from_envelope(r#"{"type": "video"}"#),
            Err(FrameError::MissingData)
        ));
        assert!(matches!(
            MediaItem::from_envelope(r#"{"type": "video", "data": "%%%"}"#),
            Err(FrameError::Base64(_))
        ));
    }

    #[test]
    fn test_audio_item_accessors() {
        let item = MediaItem::Audio(vec![1, 2, 3, 4]);
        assert_eq!(item.kind(), MediaKind::Audio);
        assert_eq!(item.mime_type(), "audio/webm");
        assert_eq!(item.len(), 4);
        assert!(!item.is_empty());
        assert_eq!(item.kind().as_str(), "audio");
    }
}
