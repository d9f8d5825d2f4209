//! Event publishing for the rest of the CRM
//!
//! Agent, lead, campaign and gamification services push their events here;
//! the hub fans them out to the caller's tenant. `call_status_updated` is
//! reserved for the session orchestrator.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::models::WsEvent;
use crate::server::{auth::Claims, error::CoreError, extract::JsonBody, hub::HubError, AppState};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublishEvent {
    AgentStatusUpdated {
        agent_id: String,
        status: String,
    },
    IncomingCall {
        agent_id: String,
        call_id: String,
        #[serde(default)]
        lead_name: String,
    },
    LeadStatusUpdated {
        lead_id: String,
        status: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    CampaignUpdate {
        campaign_id: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    GamificationEvent {
        user_id: String,
        kind: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
}

impl PublishEvent {
    fn into_event(self, tenant_id: &str) -> WsEvent {
        match self {
            Self::AgentStatusUpdated { agent_id, status } => {
                WsEvent::agent_status_updated(tenant_id, &agent_id, &status)
            }
            Self::IncomingCall {
                agent_id,
                call_id,
                lead_name,
            } => WsEvent::incoming_call(tenant_id, &agent_id, &call_id, &lead_name),
            Self::LeadStatusUpdated {
                lead_id,
                status,
                data,
            } => WsEvent::lead_status_updated(tenant_id, &lead_id, &status, data),
            Self::CampaignUpdate { campaign_id, data } => {
                WsEvent::campaign_update(tenant_id, &campaign_id, data)
            }
            Self::GamificationEvent {
                user_id,
                kind,
                data,
            } => WsEvent::gamification_event(tenant_id, &user_id, &kind, data),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PublishAck {
    pub event_id: String,
}

pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    JsonBody(req): JsonBody<PublishEvent>,
) -> Result<(StatusCode, Json<PublishAck>), CoreError> {
    let event = req.into_event(&claims.tenant_id);
    let event_id = event.event_id.clone();
    match state.hub.broadcast(event).await {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(PublishAck { event_id }))),
        Err(HubError::Saturated(id)) => Err(CoreError::Timeout(format!(
            "hub busy, event {id} dropped"
        ))),
        Err(HubError::Closed) => Err(CoreError::Internal("hub is shut down".to_string())),
    }
}
