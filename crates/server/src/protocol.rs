//! Wire protocol
//!
//! All frames are JSON text with a required `type` string. Inbound frames
//! are split into (type, payload) here and decoded per handler; outbound
//! frames are the `ServerMessage` enum (the per-student `translation`
//! message is composed in the pipeline crate).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use classbridge_core::ClientSettings;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("frame is not a JSON object: {0}")]
    NotAnObject(String),

    #[error("frame has no type field")]
    MissingType,

    #[error("malformed {message_type} payload: {message}")]
    BadPayload {
        message_type: String,
        message: String,
    },
}

/// Split a raw frame into its type tag and payload value.
pub fn decode_frame(raw: &str) -> Result<(String, Value), CodecError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| CodecError::NotAnObject(e.to_string()))?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject("not an object".to_string()));
    }
    let message_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?
        .to_string();
    Ok((message_type, value))
}

/// Decode a payload struct out of the full frame value.
pub fn decode_payload<T: serde::de::DeserializeOwned>(
    message_type: &str,
    value: Value,
) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|e| CodecError::BadPayload {
        message_type: message_type.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub role: String,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub classroom_code: Option<String>,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub settings: Option<ClientSettings>,
    /// Legacy top-level field, applied before `settings`
    #[serde(default)]
    pub tts_service_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPayload {
    #[serde(default)]
    pub settings: Option<ClientSettings>,
    #[serde(default)]
    pub tts_service_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionPayload {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub is_final_chunk: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsRequestPayload {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub language_code: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub tts_service_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSendPayload {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRequestPayload {
    pub text: String,
    #[serde(default)]
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherReplyPayload {
    pub text: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComprehensionSignalPayload {
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

// ---------------------------------------------------------------------------
// Outbound messages
// ---------------------------------------------------------------------------

pub const ERROR_INVALID_CLASSROOM: &str = "INVALID_CLASSROOM";
pub const ERROR_SESSION_EXPIRED: &str = "SESSION_EXPIRED";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAckData {
    pub role: String,
    pub language_code: String,
    pub settings: ClientSettings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentJoinedPayload {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub language_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRequestBroadcast {
    pub request_id: String,
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub language_code: String,
    pub text: String,
    pub visibility: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsError {
    pub code: String,
    pub message: String,
}

/// Every message the broker sends, apart from `translation` (composed in
/// the delivery path).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connection", rename_all = "camelCase")]
    Connection {
        status: &'static str,
        session_id: String,
    },

    #[serde(rename = "register", rename_all = "camelCase")]
    RegisterAck {
        status: &'static str,
        data: RegisterAckData,
    },

    #[serde(rename = "classroom_code", rename_all = "camelCase")]
    ClassroomCode {
        code: String,
        session_id: String,
        /// Epoch milliseconds
        expires_at: i64,
    },

    #[serde(rename = "settings", rename_all = "camelCase")]
    SettingsAck {
        status: &'static str,
        settings: ClientSettings,
    },

    #[serde(rename = "teacher_mode", rename_all = "camelCase")]
    TeacherMode { mode: &'static str },

    #[serde(rename = "student_joined", rename_all = "camelCase")]
    StudentJoined { payload: StudentJoinedPayload },

    #[serde(rename = "studentCountUpdate", rename_all = "camelCase")]
    StudentCountUpdate { count: u32 },

    #[serde(rename = "pong", rename_all = "camelCase")]
    Pong {
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        original_timestamp: Option<i64>,
    },

    #[serde(rename = "ping", rename_all = "camelCase")]
    Ping { timestamp: i64 },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error { code: String, message: String },

    #[serde(rename = "session_expired", rename_all = "camelCase")]
    SessionExpired { code: String, message: String },

    #[serde(rename = "transcription", rename_all = "camelCase")]
    Transcription {
        text: String,
        is_final: bool,
        timestamp: i64,
    },

    #[serde(rename = "tts_response", rename_all = "camelCase")]
    TtsResponse {
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        language_code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tts_service_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio_data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        use_client_speech: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        speech_params: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TtsError>,
        timestamp: i64,
    },

    #[serde(rename = "manual_send_ack", rename_all = "camelCase")]
    ManualSendAck {
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "student_request", rename_all = "camelCase")]
    StudentRequest { payload: StudentRequestBroadcast },

    #[serde(rename = "comprehension_signal", rename_all = "camelCase")]
    ComprehensionSignal { payload: Value },

    #[serde(rename = "ace_hint", rename_all = "camelCase")]
    AceHint { hint: String, timestamp: i64 },
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_frame() {
        let (t, v) = decode_frame(r#"{"type":"ping","timestamp":5}"#).unwrap();
        assert_eq!(t, "ping");
        assert_eq!(v["timestamp"], 5);

        assert!(decode_frame("not json").is_err());
        assert!(decode_frame(r#"{"no":"type"}"#).is_err());
        assert!(decode_frame(r#"[1,2,3]"#).is_err());
    }

    #[test]
    fn test_register_payload_camel_case() {
        let (_, v) = decode_frame(
            r#"{"type":"register","role":"teacher","languageCode":"en-US","teacherId":"T1"}"#,
        )
        .unwrap();
        let payload: RegisterPayload = decode_payload("register", v).unwrap();
        assert_eq!(payload.role, "teacher");
        assert_eq!(payload.language_code.as_deref(), Some("en-US"));
        assert_eq!(payload.teacher_id.as_deref(), Some("T1"));
    }

    #[test]
    fn test_server_message_tags() {
        let msg = ServerMessage::SessionExpired {
            code: ERROR_SESSION_EXPIRED.to_string(),
            message: "Session expired".to_string(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "session_expired");
        assert_eq!(v["code"], "SESSION_EXPIRED");

        let msg = ServerMessage::ClassroomCode {
            code: "AB12CD".to_string(),
            session_id: "s1".to_string(),
            expires_at: 123,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "classroom_code");
        assert_eq!(v["sessionId"], "s1");
        assert_eq!(v["expiresAt"], 123);

        let msg = ServerMessage::StudentCountUpdate { count: 3 };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "studentCountUpdate");
    }
}
