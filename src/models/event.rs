//! Live events pushed to operator WebSocket clients.
//!
//! Every event is scoped to exactly one tenant and carries an `event_id`
//! built as `<prefix>-<entity>-<unix_nanos>-<seq>`. The process-wide
//! sequence keeps ids unique even when two events share a clock reading.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::session::CallSession;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

pub const AGENT_STATUS_UPDATED: &str = "agent_status_updated";
pub const INCOMING_CALL: &str = "incoming_call";
pub const CALL_STATUS_UPDATED: &str = "call_status_updated";
pub const LEAD_STATUS_UPDATED: &str = "lead_status_updated";
pub const CAMPAIGN_UPDATE: &str = "campaign_update";
pub const GAMIFICATION_EVENT: &str = "gamification_event";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

fn next_event_id(prefix: &str, entity: &str, now: DateTime<Utc>) -> String {
    let seq = EVENT_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = now.timestamp_nanos_opt().unwrap_or_default();
    format!("{prefix}-{entity}-{nanos}-{seq}")
}

impl WsEvent {
    fn build(event_type: &str, prefix: &str, entity: &str, tenant_id: &str, data: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            event_type: event_type.to_string(),
            event_id: next_event_id(prefix, entity, now),
            timestamp: now,
            tenant_id: tenant_id.to_string(),
            user_id: None,
            agent_id: None,
            data,
        }
    }

    pub fn agent_status_updated(tenant_id: &str, agent_id: &str, status: &str) -> Self {
        let mut data = Map::new();
        data.insert("agent_id".into(), Value::from(agent_id));
        data.insert("status".into(), Value::from(status));
        let mut event = Self::build(AGENT_STATUS_UPDATED, "agent-status", agent_id, tenant_id, data);
        event.agent_id = Some(agent_id.to_string());
        event
    }

    pub fn incoming_call(tenant_id: &str, agent_id: &str, call_id: &str, lead_name: &str) -> Self {
        let mut data = Map::new();
        data.insert("call_id".into(), Value::from(call_id));
        data.insert("agent_id".into(), Value::from(agent_id));
        data.insert("lead_name".into(), Value::from(lead_name));
        let mut event = Self::build(INCOMING_CALL, "call", call_id, tenant_id, data);
        event.agent_id = Some(agent_id.to_string());
        event
    }

    /// Snapshot of a session after a state change.
    pub fn call_status_updated(session: &CallSession) -> Self {
        let mut data = Map::new();
        data.insert("call_id".into(), Value::from(session.id.as_str()));
        data.insert("status".into(), Value::from(session.status.as_str()));
        data.insert("correlation_id".into(), Value::from(session.correlation_id.as_str()));
        data.insert("to_phone".into(), Value::from(session.to_phone.as_str()));
        data.insert("direction".into(), Value::from(session.direction.as_str()));
        if let Some(external_id) = &session.external_id {
            data.insert("external_id".into(), Value::from(external_id.as_str()));
        }
        if let Some(code) = &session.error_code {
            data.insert("error_code".into(), Value::from(code.as_str()));
        }
        if let Some(reason) = &session.disconnect_reason {
            data.insert("disconnect_reason".into(), Value::from(reason.as_str()));
        }
        if let Some(duration) = session.duration_seconds {
            data.insert("duration_seconds".into(), Value::from(duration));
        }
        if let Some(to) = session.transfer_to.as_deref().filter(|_| session.is_transferred) {
            data.insert("transferred_to".into(), Value::from(to));
        }
        let mut event = Self::build(CALL_STATUS_UPDATED, "call-update", &session.id, &session.tenant_id, data);
        event.user_id = Some(session.initiated_by.clone());
        event.agent_id = session.agent_id.clone();
        event
    }

    pub fn lead_status_updated(tenant_id: &str, lead_id: &str, status: &str, mut data: Map<String, Value>) -> Self {
        data.insert("lead_id".into(), Value::from(lead_id));
        data.insert("status".into(), Value::from(status));
        Self::build(LEAD_STATUS_UPDATED, "lead-update", lead_id, tenant_id, data)
    }

    pub fn campaign_update(tenant_id: &str, campaign_id: &str, mut data: Map<String, Value>) -> Self {
        data.insert("campaign_id".into(), Value::from(campaign_id));
        Self::build(CAMPAIGN_UPDATE, "campaign", campaign_id, tenant_id, data)
    }

    pub fn gamification_event(tenant_id: &str, user_id: &str, kind: &str, mut data: Map<String, Value>) -> Self {
        data.insert("event_type".into(), Value::from(kind));
        let mut event = Self::build(GAMIFICATION_EVENT, "gamif", user_id, tenant_id, data);
        event.user_id = Some(user_id.to_string());
        event
    }
}
