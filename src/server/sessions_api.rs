//! Call session handlers

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{
    CallSession, InitiateCallRequest, SessionFilter, SessionPage, SessionStats, SessionStatus,
};
use crate::server::{auth::Claims, error::CoreError, extract::JsonBody, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<String>,
    pub agent_id: Option<String>,
    pub lead_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_phone: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactsRequest {
    pub recording_url: Option<String>,
    pub transcript_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProviderStatusResponse {
    pub session_id: String,
    pub provider_status: String,
}

/// Start an outbound call
pub async fn initiate_session(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    JsonBody(req): JsonBody<InitiateCallRequest>,
) -> Result<(StatusCode, Json<CallSession>), CoreError> {
    let session = state.calls.initiate(&claims.tenant_id, &claims.sub, req).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<SessionPage>, CoreError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(CoreError::Validation)?;
    let filter = SessionFilter {
        status,
        agent_id: query.agent_id,
        lead_id: query.lead_id,
    };

    let page = state
        .calls
        .list(&claims.tenant_id, &filter, query.limit, query.offset)
        .await?;
    Ok(Json(page))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<CallSession>, CoreError> {
    Ok(Json(state.calls.get(&id, &claims.tenant_id).await?))
}

pub async fn session_stats(
    State(state): State<Arc<AppState>>,
    claims: Claims,
) -> Result<Json<SessionStats>, CoreError> {
    Ok(Json(state.calls.stats(&claims.tenant_id).await?))
}

/// Ask the provider what it thinks the call is doing
pub async fn provider_status(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<ProviderStatusResponse>, CoreError> {
    let provider_status = state.calls.provider_status(&id, &claims.tenant_id).await?;
    Ok(Json(ProviderStatusResponse {
        session_id: id,
        provider_status,
    }))
}

pub async fn transfer_session(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<TransferRequest>,
) -> Result<Json<CallSession>, CoreError> {
    Ok(Json(
        state
            .calls
            .transfer(&id, &claims.tenant_id, &req.to_phone)
            .await?,
    ))
}

pub async fn end_session(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<CallSession>, CoreError> {
    let req: EndRequest = if body.is_empty() {
        EndRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| CoreError::Validation(e.to_string()))?
    };
    let reason = req.reason.filter(|r| !r.is_empty());
    Ok(Json(
        state
            .calls
            .end(&id, &claims.tenant_id, reason.as_deref())
            .await?,
    ))
}

/// Attach recording or transcript links, also after the call has ended
pub async fn attach_artifacts(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<ArtifactsRequest>,
) -> Result<Json<CallSession>, CoreError> {
    if req.recording_url.is_none() && req.transcript_url.is_none() {
        return Err(CoreError::Validation(
            "recording_url or transcript_url is required".to_string(),
        ));
    }
    Ok(Json(
        state
            .calls
            .attach_artifacts(
                &id,
                &claims.tenant_id,
                req.recording_url.as_deref(),
                req.transcript_url.as_deref(),
            )
            .await?,
    ))
}
