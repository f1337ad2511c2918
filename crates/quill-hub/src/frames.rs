//! Wire frames of the streaming edit protocol.
//!
//! Frames are JSON with a `type` tag and a `data` payload. Patch bodies
//! travel as base64-encoded JSON against a closed schema; unknown fields
//! are rejected.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quill_types::{CoreError, CoreResult, Note, NotePatch};
use serde::{Deserialize, Serialize};

/// Close code: authentication failure
pub const CLOSE_POLICY: u16 = 1008;
/// Close code: quota denied
pub const CLOSE_QUOTA: u16 = 4008;
/// Close code: slow consumer (outbound queue overflow)
pub const CLOSE_SLOW_CONSUMER: u16 = 4009;
/// Close code: internal failure
pub const CLOSE_INTERNAL: u16 = 1011;
/// Close code: note absent or deleted
pub const CLOSE_NOT_FOUND: u16 = 1404;

/// Edit-bus channel key for a note
pub fn note_channel(note_id: &str) -> String {
    format!("note:{note_id}")
}

/// Server → client frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerFrame {
    Init(InitData),
    Update(UpdateData),
    Error(ErrorData),
}

/// First frame of every session: the current note state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitData {
    pub note_id: String,
    pub title: String,
    pub body: String,
    pub version: i64,
}

/// One committed mutation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateData {
    pub title: String,
    pub body: String,
    pub version: i64,
}

/// Error frame sent to the originating session only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<i64>,
}

impl ErrorData {
    /// Frame representation of a core error, with the frame-level code names
    /// of the protocol (`VERSION_MISMATCH`, `NOT_FOUND`, ...).
    pub fn from_error(err: &CoreError) -> Self {
        let (code, current_version) = match err {
            CoreError::VersionMismatch { current } => ("VERSION_MISMATCH", Some(*current)),
            CoreError::NotFound(_) => ("NOT_FOUND", None),
            CoreError::QuotaExceeded { .. } => ("RATE_LIMIT", None),
            CoreError::Unauthenticated(_) | CoreError::Expired(_) => ("UNAUTHENTICATED", None),
            CoreError::Forbidden(_) => ("FORBIDDEN", None),
            CoreError::Invalid(_) => ("INVALID_PATCH", None),
            CoreError::SlowConsumer => ("SLOW_CONSUMER", None),
            CoreError::Internal(_) => ("INTERNAL", None),
        };
        Self {
            code: code.to_string(),
            // Internal details stay opaque on the wire
            message: if matches!(err, CoreError::Internal(_)) {
                "internal error".to_string()
            } else {
                err.to_string()
            },
            current_version,
        }
    }
}

/// Client → server frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ClientFrame {
    Patch(PatchData),
}

/// A version-guarded patch request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchData {
    /// The client's last observed version
    pub version: i64,
    /// base64 of JSON `{title?, body?}`
    pub patch: String,
}

impl PatchData {
    /// Decode the inner patch object against the closed schema.
    pub fn decode(&self) -> CoreResult<NotePatch> {
        let raw = BASE64
            .decode(&self.patch)
            .map_err(|e| CoreError::invalid(format!("patch is not valid base64: {e}")))?;
        serde_json::from_slice::<NotePatch>(&raw)
            .map_err(|e| CoreError::invalid(format!("patch payload rejected: {e}")))
    }

    /// Encode a patch object (client helper, used heavily by tests).
    pub fn encode(version: i64, patch: &NotePatch) -> CoreResult<Self> {
        let raw = serde_json::to_vec(patch)
            .map_err(|e| CoreError::internal(format!("patch encode: {e}")))?;
        Ok(Self {
            version,
            patch: BASE64.encode(raw),
        })
    }
}

/// Payload published on the edit bus for every commit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateEvent {
    pub note_id: String,
    pub title: String,
    pub body: String,
    pub version: i64,
}

impl UpdateEvent {
    pub fn from_note(note: &Note) -> Self {
        Self {
            note_id: note.note_id.clone(),
            title: note.title.clone(),
            body: note.body.clone(),
            version: note.version,
        }
    }

    pub fn to_update_frame(&self) -> ServerFrame {
        ServerFrame::Update(UpdateData {
            title: self.title.clone(),
            body: self.body.clone(),
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_frames_serialize_with_type_tag() {
        let frame = ServerFrame::Init(InitData {
            note_id: "n1".into(),
            title: "T".into(),
            body: "B".into(),
            version: 1,
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "init");
        assert_eq!(json["data"]["note_id"], "n1");
        assert_eq!(json["data"]["version"], 1);
    }

    #[test]
    fn error_frame_omits_absent_current_version() {
        let frame = ServerFrame::Error(ErrorData {
            code: "NOT_FOUND".into(),
            message: "gone".into(),
            current_version: None,
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("current_version"));
    }

    #[test]
    fn version_mismatch_frame_carries_current_version() {
        let data = ErrorData::from_error(&CoreError::VersionMismatch { current: 3 });
        assert_eq!(data.code, "VERSION_MISMATCH");
        assert_eq!(data.current_version, Some(3));
    }

    #[test]
    fn internal_errors_stay_opaque_on_the_wire() {
        let data = ErrorData::from_error(&CoreError::internal("pool exhausted at 10.0.0.3"));
        assert_eq!(data.code, "INTERNAL");
        assert_eq!(data.message, "internal error");
    }

    #[test]
    fn patch_round_trips_through_base64() {
        let patch = NotePatch {
            title: Some("T2".into()),
            body: None,
        };
        let data = PatchData::encode(2, &patch).unwrap();
        let decoded = data.decode().unwrap();
        assert_eq!(decoded.title.as_deref(), Some("T2"));
        assert_eq!(decoded.body, None);
    }

    #[test]
    fn patch_with_unknown_fields_is_rejected() {
        let raw = BASE64.encode(br#"{"title":"x","owner":"me"}"#);
        let data = PatchData {
            version: 1,
            patch: raw,
        };
        assert_eq!(data.decode().unwrap_err().code(), "invalid");
    }

    #[test]
    fn client_frame_parses_the_documented_shape() {
        let json = format!(
            r#"{{"type":"patch","data":{{"version":2,"patch":"{}"}}}}"#,
            BASE64.encode(br#"{"title":"A"}"#)
        );
        let ClientFrame::Patch(data) = serde_json::from_str(&json).unwrap();
        assert_eq!(data.version, 2);
        assert_eq!(data.decode().unwrap().title.as_deref(), Some("A"));
    }

    #[test]
    fn channel_keys_are_per_note() {
        assert_eq!(note_channel("abc"), "note:abc");
    }
}
