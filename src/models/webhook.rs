use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::session::SessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processed,
    Failed,
    /// Verified and logged, but no transition applied.
    Skipped,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processed => "PROCESSED",
            ProcessingStatus::Failed => "FAILED",
            ProcessingStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSED" => Ok(ProcessingStatus::Processed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            "SKIPPED" => Ok(ProcessingStatus::Skipped),
            other => Err(format!("unknown processing status: {other}")),
        }
    }
}

/// Call events a provider can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventType {
    CallInitiated,
    CallRinging,
    CallAnswered,
    CallEnded,
    CallFailed,
    Unknown(String),
}

impl WebhookEventType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CALL_INITIATED" => WebhookEventType::CallInitiated,
            "CALL_RINGING" => WebhookEventType::CallRinging,
            "CALL_ANSWERED" => WebhookEventType::CallAnswered,
            "CALL_ENDED" => WebhookEventType::CallEnded,
            "CALL_FAILED" => WebhookEventType::CallFailed,
            _ => WebhookEventType::Unknown(raw.to_string()),
        }
    }

    /// Session status this event drives the call into.
    pub fn target_status(&self) -> Option<SessionStatus> {
        match self {
            WebhookEventType::CallInitiated => Some(SessionStatus::Connecting),
            WebhookEventType::CallRinging => Some(SessionStatus::Ringing),
            WebhookEventType::CallAnswered => Some(SessionStatus::Connected),
            WebhookEventType::CallEnded => Some(SessionStatus::Completed),
            WebhookEventType::CallFailed => Some(SessionStatus::Failed),
            WebhookEventType::Unknown(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WebhookEventType::CallInitiated => "CALL_INITIATED",
            WebhookEventType::CallRinging => "CALL_RINGING",
            WebhookEventType::CallAnswered => "CALL_ANSWERED",
            WebhookEventType::CallEnded => "CALL_ENDED",
            WebhookEventType::CallFailed => "CALL_FAILED",
            WebhookEventType::Unknown(raw) => raw,
        }
    }
}

/// Fields of a provider callback the core interprets. Everything else stays
/// in `extra` and in the raw log row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub event_type: String,
    /// Provider-side call id, matched against `external_id`. Gateways that
    /// number their calls send it as a JSON number.
    #[serde(default, deserialize_with = "string_or_number")]
    pub session_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!(
            "expected a string or number, found {other}"
        ))),
    }
}

impl WebhookPayload {
    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn event(&self) -> WebhookEventType {
        WebhookEventType::parse(&self.event_type)
    }
}

/// Append-only audit row for one provider callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: String,
    pub tenant_id: String,
    pub provider_id: String,
    pub event_type: String,
    pub raw_payload: String,
    pub signature: Option<String>,
    pub signature_valid: bool,
    pub processing_status: ProcessingStatus,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookLog {
    pub fn new(tenant_id: &str, provider_id: &str, raw: &[u8], signature: Option<&str>) -> Self {
        let raw_payload = String::from_utf8_lossy(raw).into_owned();
        let event_type = serde_json::from_str::<Value>(&raw_payload)
            .ok()
            .and_then(|v| v.get("event_type").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            provider_id: provider_id.to_string(),
            event_type,
            raw_payload,
            signature: signature.map(str::to_string),
            signature_valid: false,
            processing_status: ProcessingStatus::Pending,
            error: None,
            received_at: Utc::now(),
            processed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mapping() {
        assert_eq!(
            WebhookEventType::parse("CALL_RINGING").target_status(),
            Some(SessionStatus::Ringing)
        );
        assert_eq!(
            WebhookEventType::parse("call_ended").target_status(),
            Some(SessionStatus::Completed)
        );
        let unknown = WebhookEventType::parse("CALL_PARKED");
        assert_eq!(unknown.target_status(), None);
        assert_eq!(unknown.as_str(), "CALL_PARKED");
    }

    #[test]
    fn test_payload_keeps_unknown_fields() {
        let raw = br#"{"event_type":"CALL_ENDED","session_id":"CA1","reason":"hangup","carrier":"x"}"#;
        let payload = WebhookPayload::from_slice(raw).unwrap();
        assert_eq!(payload.event(), WebhookEventType::CallEnded);
        assert_eq!(payload.session_id, "CA1");
        assert_eq!(payload.reason.as_deref(), Some("hangup"));
        assert_eq!(payload.extra.get("carrier"), Some(&Value::from("x")));
    }

    #[test]
    fn test_numeric_session_id_is_stringified() {
        let payload =
            WebhookPayload::from_slice(br#"{"event_type":"CALL_RINGING","session_id":42}"#).unwrap();
        assert_eq!(payload.session_id, "42");

        let missing = WebhookPayload::from_slice(br#"{"event_type":"CALL_RINGING"}"#).unwrap();
        assert_eq!(missing.session_id, "");
        let null = WebhookPayload::from_slice(br#"{"session_id":null}"#).unwrap();
        assert_eq!(null.session_id, "");

        assert!(WebhookPayload::from_slice(br#"{"session_id":{"id":1}}"#).is_err());
    }

    #[test]
    fn test_log_extracts_event_type_leniently() {
        let log = WebhookLog::new("t1", "p1", br#"{"event_type":"CALL_RINGING"}"#, Some("sig"));
        assert_eq!(log.event_type, "CALL_RINGING");
        assert_eq!(log.processing_status, ProcessingStatus::Pending);

        let garbage = WebhookLog::new("t1", "p1", b"not json", None);
        assert_eq!(garbage.event_type, "");
        assert_eq!(garbage.raw_payload, "not json");
    }
}
