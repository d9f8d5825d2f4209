//! Provider administration and webhook ingest

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::models::{CreateProviderRequest, ProcessingStatus, ProviderView, WebhookLog};
use crate::server::{auth::Claims, error::CoreError, extract::JsonBody, AppState};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub log_id: String,
    pub processing_status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Register a provider for the caller's tenant
pub async fn create_provider(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    JsonBody(req): JsonBody<CreateProviderRequest>,
) -> Result<(StatusCode, Json<ProviderView>), CoreError> {
    let provider = req.into_provider(&claims.tenant_id, &claims.sub);
    let provider = state.registry.register(provider).await?;
    Ok((StatusCode::CREATED, Json(provider.redacted())))
}

/// Active providers in selection order
pub async fn list_providers(
    State(state): State<Arc<AppState>>,
    claims: Claims,
) -> Result<Json<Vec<ProviderView>>, CoreError> {
    let providers = state.registry.list_active(&claims.tenant_id).await?;
    Ok(Json(providers.iter().map(|p| p.redacted()).collect()))
}

pub async fn get_provider(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<ProviderView>, CoreError> {
    let provider = state.registry.get(&claims.tenant_id, &id).await?;
    Ok(Json(provider.redacted()))
}

/// Provider callback. Authenticated by signature, not by token.
pub async fn ingest_webhook(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, provider_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, CoreError> {
    let provider = state.registry.get(&tenant_id, &provider_id).await?;
    let signature = headers
        .get(provider.kind.signature_header())
        .and_then(|v| v.to_str().ok());

    let outcome = state
        .calls
        .on_webhook(&tenant_id, &provider_id, &body, signature)
        .await?;

    Ok(Json(WebhookAck {
        log_id: outcome.log_id,
        processing_status: outcome.status,
        detail: outcome.detail,
    }))
}

/// Webhook audit trail for the caller's tenant
pub async fn list_webhook_logs(
    State(state): State<Arc<AppState>>,
    claims: Claims,
) -> Result<Json<Vec<WebhookLog>>, CoreError> {
    Ok(Json(
        state.stores.sessions.list_webhook_logs(&claims.tenant_id).await?,
    ))
}
