//! AI query handlers

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::{AiProviderStats, AiQueryBody, AiRequest, AiResponse, AiUsageSummary};
use crate::server::{auth::Claims, error::CoreError, extract::JsonBody, AppState};

const DEFAULT_USAGE_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct UsageQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

pub async fn query(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    JsonBody(body): JsonBody<AiQueryBody>,
) -> Result<Json<AiResponse>, CoreError> {
    if body.query.trim().is_empty() {
        return Err(CoreError::Validation("query is required".to_string()));
    }
    let request = AiRequest {
        tenant_id: claims.tenant_id,
        query: body.query,
        context: body.context,
        priority: body.priority,
    };
    Ok(Json(state.ai.process_query(request).await?))
}

pub async fn provider_stats(
    State(state): State<Arc<AppState>>,
    _claims: Claims,
) -> Json<BTreeMap<String, AiProviderStats>> {
    Json(state.ai.get_provider_stats().await)
}

/// Usage totals, last 30 days unless a window is given
pub async fn tenant_usage(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Query(window): Query<UsageQuery>,
) -> Result<Json<AiUsageSummary>, CoreError> {
    let end = window.end.unwrap_or_else(Utc::now);
    let start = window
        .start
        .unwrap_or(end - Duration::days(DEFAULT_USAGE_WINDOW_DAYS));
    if start > end {
        return Err(CoreError::Validation("start must not be after end".to_string()));
    }
    Ok(Json(
        state
            .ai
            .get_tenant_usage(&claims.tenant_id, start, end)
            .await?,
    ))
}
