use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of a click-to-call session.
///
/// ```text
/// INITIATED  -> CONNECTING, FAILED
/// CONNECTING -> RINGING, CONNECTED, FAILED
/// RINGING    -> CONNECTED, FAILED, COMPLETED
/// CONNECTED  -> COMPLETED, FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Initiated,
    Connecting,
    Ringing,
    Connected,
    Completed,
    Failed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 6] = [
        SessionStatus::Initiated,
        SessionStatus::Connecting,
        SessionStatus::Ringing,
        SessionStatus::Connected,
        SessionStatus::Completed,
        SessionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initiated => "INITIATED",
            SessionStatus::Connecting => "CONNECTING",
            SessionStatus::Ringing => "RINGING",
            SessionStatus::Connected => "CONNECTED",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Initiated, Connecting)
                | (Initiated, Failed)
                | (Connecting, Ringing)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Ringing, Connected)
                | (Ringing, Failed)
                | (Ringing, Completed)
                | (Connected, Completed)
                | (Connected, Failed)
        )
    }

    /// Terminal state reached when a call is hung up from this state.
    ///
    /// Calls that rang or connected complete; calls torn down earlier fail.
    pub fn close_target(&self) -> Option<SessionStatus> {
        if self.can_transition_to(SessionStatus::Completed) {
            Some(SessionStatus::Completed)
        } else if self.can_transition_to(SessionStatus::Failed) {
            Some(SessionStatus::Failed)
        } else {
            None
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown session status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "INBOUND",
            CallDirection::Outbound => "OUTBOUND",
        }
    }
}

impl FromStr for CallDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INBOUND" => Ok(CallDirection::Inbound),
            "OUTBOUND" => Ok(CallDirection::Outbound),
            other => Err(format!("unknown call direction: {other}")),
        }
    }
}

/// A tracked call attempt, from initiation to a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub id: String,
    pub tenant_id: String,
    pub initiated_by: String,
    pub from_phone: String,
    pub to_phone: String,
    pub direction: CallDirection,
    pub provider_id: Option<String>,
    pub external_id: Option<String>,
    pub correlation_id: String,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub ring_seconds: Option<i64>,
    pub answer_seconds: Option<i64>,
    pub disconnect_reason: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub recording_url: Option<String>,
    pub transcript_url: Option<String>,
    pub agent_id: Option<String>,
    pub lead_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub is_transferred: bool,
    pub transfer_to: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CallSession {
    /// Build a fresh `INITIATED` session for `tenant_id`.
    pub fn new(tenant_id: &str, initiated_by: &str, req: &InitiateCallRequest) -> Self {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            correlation_id: format!("corr_{}", uuid::Uuid::new_v4().simple()),
            id,
            tenant_id: tenant_id.to_string(),
            initiated_by: initiated_by.to_string(),
            from_phone: String::new(),
            to_phone: req.to_phone.trim().to_string(),
            direction: req.direction.unwrap_or(CallDirection::Outbound),
            provider_id: None,
            external_id: None,
            status: SessionStatus::Initiated,
            started_at: None,
            ended_at: None,
            duration_seconds: None,
            ring_seconds: None,
            answer_seconds: None,
            disconnect_reason: None,
            error_code: None,
            error_message: None,
            recording_url: None,
            transcript_url: None,
            agent_id: req.agent_id.clone(),
            lead_id: req.lead_id.clone(),
            contact_name: req.contact_name.clone(),
            contact_email: req.contact_email.clone(),
            is_transferred: false,
            transfer_to: None,
            metadata: req.metadata.clone().unwrap_or_default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Body of `POST /sessions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitiateCallRequest {
    #[serde(default)]
    pub to_phone: String,
    pub direction: Option<CallDirection>,
    pub lead_id: Option<String>,
    pub agent_id: Option<String>,
    pub provider_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub agent_id: Option<String>,
    pub lead_id: Option<String>,
}

impl SessionFilter {
    pub fn matches(&self, session: &CallSession) -> bool {
        self.status.is_none_or(|s| s == session.status)
            && self
                .agent_id
                .as_deref()
                .is_none_or(|a| session.agent_id.as_deref() == Some(a))
            && self
                .lead_id
                .as_deref()
                .is_none_or(|l| session.lead_id.as_deref() == Some(l))
    }
}

/// Partial timing update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTimings {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub ring_seconds: Option<i64>,
    pub answer_seconds: Option<i64>,
}

impl SessionTimings {
    /// Check `ended_at >= started_at >= created_at` against the merged row.
    pub fn is_consistent_with(&self, session: &CallSession) -> bool {
        let started = self.started_at.or(session.started_at);
        let ended = self.ended_at.or(session.ended_at);
        if let Some(started) = started {
            if started < session.created_at {
                return false;
            }
        }
        match (started, ended) {
            (Some(s), Some(e)) => e >= s,
            (None, Some(e)) => e >= session.created_at,
            _ => true,
        }
    }
}

/// Fields written together with a status change, in the same store write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusExtras {
    /// `(error_code, error_message)`
    pub error: Option<(String, String)>,
    /// Stamp `answer_seconds`, plus `ring_seconds` when leaving `RINGING`.
    pub answered: bool,
    pub recording_url: Option<String>,
}

impl StatusExtras {
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            error: Some((code.to_string(), message.to_string())),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionPage {
    pub items: Vec<CallSession>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Aggregate call statistics for a tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub total_calls: i64,
    pub completed_calls: i64,
    pub failed_calls: i64,
    pub total_duration: i64,
    pub average_duration: i64,
    pub by_status: BTreeMap<String, i64>,
}

impl SessionStats {
    pub fn from_sessions<'a>(sessions: impl IntoIterator<Item = &'a CallSession>) -> Self {
        let mut stats = SessionStats::default();
        for session in sessions {
            stats.total_calls += 1;
            *stats
                .by_status
                .entry(session.status.as_str().to_string())
                .or_insert(0) += 1;
            match session.status {
                SessionStatus::Completed => {
                    stats.completed_calls += 1;
                    stats.total_duration += session.duration_seconds.unwrap_or(0);
                }
                SessionStatus::Failed => stats.failed_calls += 1,
                _ => {}
            }
        }
        if stats.completed_calls > 0 {
            stats.average_duration = stats.total_duration / stats.completed_calls;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions_match_table() {
        use SessionStatus::*;
        let legal = [
            (Initiated, Connecting),
            (Initiated, Failed),
            (Connecting, Ringing),
            (Connecting, Connected),
            (Connecting, Failed),
            (Ringing, Connected),
            (Ringing, Failed),
            (Ringing, Completed),
            (Connected, Completed),
            (Connected, Failed),
        ];
        for from in SessionStatus::ALL {
            for to in SessionStatus::ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to} should be {expected}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for to in SessionStatus::ALL {
            assert!(!SessionStatus::Completed.can_transition_to(to));
            assert!(!SessionStatus::Failed.can_transition_to(to));
        }
        assert_eq!(SessionStatus::Completed.close_target(), None);
    }

    #[test]
    fn test_close_target_depends_on_progress() {
        assert_eq!(SessionStatus::Ringing.close_target(), Some(SessionStatus::Completed));
        assert_eq!(SessionStatus::Connected.close_target(), Some(SessionStatus::Completed));
        assert_eq!(SessionStatus::Connecting.close_target(), Some(SessionStatus::Failed));
        assert_eq!(SessionStatus::Initiated.close_target(), Some(SessionStatus::Failed));
    }

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!("ringing".parse::<SessionStatus>().unwrap(), SessionStatus::Ringing);
        assert_eq!("COMPLETED".parse::<SessionStatus>().unwrap(), SessionStatus::Completed);
        assert!("DISCONNECTED".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&SessionStatus::Connecting).unwrap();
        assert_eq!(json, "\"CONNECTING\"");
    }

    #[test]
    fn test_timings_reject_end_before_start() {
        let session = CallSession::new(
            "t1",
            "u1",
            &InitiateCallRequest {
                to_phone: "+15550001".into(),
                direction: Some(CallDirection::Outbound),
                ..Default::default()
            },
        );
        let start = session.created_at + chrono::Duration::seconds(5);
        let ok = SessionTimings {
            started_at: Some(start),
            ended_at: Some(start + chrono::Duration::seconds(30)),
            ..Default::default()
        };
        assert!(ok.is_consistent_with(&session));

        let backwards = SessionTimings {
            started_at: Some(start),
            ended_at: Some(start - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!backwards.is_consistent_with(&session));

        let before_creation = SessionTimings {
            started_at: Some(session.created_at - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!before_creation.is_consistent_with(&session));
    }

    #[test]
    fn test_stats_aggregate_by_status() {
        let req = InitiateCallRequest {
            to_phone: "+1".into(),
            direction: Some(CallDirection::Outbound),
            ..Default::default()
        };
        let mut a = CallSession::new("t1", "u", &req);
        a.status = SessionStatus::Completed;
        a.duration_seconds = Some(40);
        let mut b = CallSession::new("t1", "u", &req);
        b.status = SessionStatus::Completed;
        b.duration_seconds = Some(20);
        let mut c = CallSession::new("t1", "u", &req);
        c.status = SessionStatus::Failed;

        let stats = SessionStats::from_sessions([&a, &b, &c]);
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.completed_calls, 2);
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.total_duration, 60);
        assert_eq!(stats.average_duration, 30);
        assert_eq!(stats.by_status.get("COMPLETED"), Some(&2));
    }
}
