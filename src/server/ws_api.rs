//! WebSocket upgrade and hub stats

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    Json,
};
use std::sync::Arc;

use crate::server::hub::HubStats;
use crate::server::{auth::Claims, AppState};

/// Upgrade and hand the socket to the hub under the caller's tenant
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    claims: Claims,
) -> Response {
    tracing::info!(
        tenant_id = %claims.tenant_id,
        user_id = %claims.sub,
        "WebSocket connection initiated"
    );
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| hub.handle(socket, claims.tenant_id, claims.sub))
}

pub async fn ws_stats(State(state): State<Arc<AppState>>, _claims: Claims) -> Json<HubStats> {
    Json(state.hub.stats().await)
}
