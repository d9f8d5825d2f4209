//! Session orchestrator
//!
//! Drives a call session from `POST /sessions` through provider webhooks to
//! a terminal state. Every status change goes through the store, which
//! enforces the lifecycle, and every visible change is broadcast to the
//! tenant as `call_status_updated`.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::models::{
    CallSession, InitiateCallRequest, ProcessingStatus, SessionFilter, SessionPage, SessionStats,
    SessionStatus, StatusExtras, VoipProvider, WebhookEventType, WebhookLog, WebhookPayload,
    WsEvent,
};
use crate::server::db::{SessionStore, StoreError};
use crate::server::error::CoreError;
use crate::server::hub::Hub;
use crate::server::registry::ProviderRegistry;
use crate::server::voip::{AdapterError, VoipAdapter, UNKNOWN_STATUS};

pub const PROVIDER_NOT_FOUND: &str = "PROVIDER_NOT_FOUND";
pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";
pub const PROVIDER_TIMEOUT: &str = "PROVIDER_TIMEOUT";
pub const CALL_FAILED: &str = "CALL_FAILED";
pub const SETUP_FAILED: &str = "SETUP_FAILED";

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// What became of a verified webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookOutcome {
    pub log_id: String,
    pub status: ProcessingStatus,
    pub detail: Option<String>,
}

enum Applied {
    Session(CallSession),
    Skipped(String),
}

pub struct SessionOrchestrator {
    sessions: Arc<dyn SessionStore>,
    registry: Arc<ProviderRegistry>,
    hub: Arc<Hub>,
    http: reqwest::Client,
    shutdown: CancellationToken,
}

impl SessionOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        registry: Arc<ProviderRegistry>,
        hub: Arc<Hub>,
        http: reqwest::Client,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sessions,
            registry,
            hub,
            http,
            shutdown,
        }
    }

    fn adapter(&self, provider: &VoipProvider) -> Result<VoipAdapter, AdapterError> {
        VoipAdapter::for_provider(provider, self.http.clone(), self.shutdown.clone())
    }

    async fn announce(&self, session: &CallSession) {
        self.hub.publish(WsEvent::call_status_updated(session)).await;
    }

    async fn fail(&self, session: &CallSession, code: &str, message: &str) -> Result<CallSession, CoreError> {
        Ok(self
            .sessions
            .update_status_with(
                &session.id,
                &session.tenant_id,
                SessionStatus::Failed,
                &StatusExtras::error(code, message),
            )
            .await?)
    }

    /// Best effort: mark a session whose set-up broke as `FAILED` so it is
    /// not left `INITIATED`, then hand back the original error.
    async fn abandon(&self, session: &CallSession, err: CoreError) -> CoreError {
        match self.fail(session, SETUP_FAILED, &err.to_string()).await {
            Ok(failed) => self.announce(&failed).await,
            Err(e) => tracing::error!(
                session_id = %session.id,
                "Could not mark abandoned session failed: {}",
                e
            ),
        }
        err
    }

    // ====== Initiation ======

    pub async fn initiate(
        &self,
        tenant_id: &str,
        user_id: &str,
        request: InitiateCallRequest,
    ) -> Result<CallSession, CoreError> {
        if request.to_phone.trim().is_empty() {
            return Err(CoreError::Validation("to_phone is required".to_string()));
        }
        if request.direction.is_none() {
            return Err(CoreError::Validation("direction is required".to_string()));
        }

        let session = self
            .sessions
            .create(&CallSession::new(tenant_id, user_id, &request))
            .await?;
        tracing::info!(
            tenant_id = %tenant_id,
            session_id = %session.id,
            correlation_id = %session.correlation_id,
            "Call session created for {}",
            session.to_phone
        );

        let provider = match self
            .registry
            .select(tenant_id, request.provider_id.as_deref())
            .await
        {
            Ok(provider) => provider,
            Err(CoreError::NoProvider(reason)) => {
                tracing::warn!(session_id = %session.id, "No provider for session: {}", reason);
                let failed = self.fail(&session, PROVIDER_NOT_FOUND, &reason).await?;
                self.announce(&failed).await;
                return Err(CoreError::NoProvider(reason));
            }
            Err(e) => return Err(self.abandon(&session, e).await),
        };

        let routed = match self
            .sessions
            .set_routing(&session.id, tenant_id, &provider.id, &provider.sender_number)
            .await
        {
            Ok(routed) => routed,
            Err(e) => return Err(self.abandon(&session, e.into()).await),
        };

        let placed = match self.adapter(&provider) {
            Ok(adapter) => adapter.initiate_call(&routed).await,
            Err(e) => Err(e),
        };

        let session = match placed {
            Ok(external_id) => {
                let connected = async {
                    self.sessions
                        .set_external_id(&routed.id, tenant_id, &provider.id, &external_id)
                        .await?;
                    self.sessions
                        .update_status(&routed.id, tenant_id, SessionStatus::Connecting)
                        .await
                }
                .await;
                let connecting = match connected {
                    Ok(connecting) => connecting,
                    Err(e) => return Err(self.abandon(&routed, e.into()).await),
                };
                tracing::info!(
                    session_id = %connecting.id,
                    provider_id = %provider.id,
                    "Call placed upstream as {}",
                    external_id
                );
                connecting
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %routed.id,
                    provider_id = %provider.id,
                    "Provider rejected call: {}",
                    e
                );
                let code = match e {
                    AdapterError::Timeout(_) => PROVIDER_TIMEOUT,
                    _ => PROVIDER_ERROR,
                };
                self.fail(&routed, code, &e.to_string()).await?
            }
        };

        self.announce(&session).await;
        Ok(session)
    }

    // ====== Webhooks ======

    /// Verify, log and apply one provider webhook.
    ///
    /// Only a bad signature (401), an unknown provider (404) or a failure to
    /// write the log row is reported as an error. Anything that goes wrong
    /// after verification lands in the log row instead.
    pub async fn on_webhook(
        &self,
        tenant_id: &str,
        provider_id: &str,
        raw: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, CoreError> {
        let provider = self.registry.get(tenant_id, provider_id).await?;
        let mut log = WebhookLog::new(tenant_id, provider_id, raw, signature);

        let valid = match (self.adapter(&provider), signature) {
            (Ok(adapter), Some(sig)) => adapter.validate_webhook_signature(raw, sig),
            (Err(e), _) => {
                tracing::error!(provider_id = %provider_id, "Cannot verify webhook: {}", e);
                false
            }
            (_, None) => false,
        };

        if !valid {
            log.processing_status = ProcessingStatus::Failed;
            log.error = Some("signature invalid".to_string());
            log.processed_at = Some(Utc::now());
            self.sessions.save_webhook_log(&log).await?;
            tracing::warn!(
                tenant_id = %tenant_id,
                provider_id = %provider_id,
                "Rejected webhook with invalid signature"
            );
            return Err(CoreError::SignatureInvalid);
        }

        log.signature_valid = true;
        self.sessions.save_webhook_log(&log).await?;

        let (status, detail) = match self.apply_webhook(tenant_id, provider_id, raw).await {
            Ok(Applied::Session(session)) => {
                self.announce(&session).await;
                (ProcessingStatus::Processed, None)
            }
            Ok(Applied::Skipped(reason)) => (ProcessingStatus::Skipped, Some(reason)),
            Err(reason) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    provider_id = %provider_id,
                    "Webhook not applied: {}",
                    reason
                );
                (ProcessingStatus::Failed, Some(reason))
            }
        };

        if let Err(e) = self
            .sessions
            .mark_webhook_log(&log.id, tenant_id, status, detail.as_deref())
            .await
        {
            tracing::error!(log_id = %log.id, "Failed to update webhook log: {}", e);
        }

        Ok(WebhookOutcome {
            log_id: log.id,
            status,
            detail,
        })
    }

    async fn apply_webhook(&self, tenant_id: &str, provider_id: &str, raw: &[u8]) -> Result<Applied, String> {
        let payload =
            WebhookPayload::from_slice(raw).map_err(|e| format!("unparseable payload: {e}"))?;
        let event = payload.event();
        let Some(target) = event.target_status() else {
            tracing::warn!(tenant_id = %tenant_id, "Unknown webhook event type '{}'", event.as_str());
            return Ok(Applied::Skipped(format!("unknown event type '{}'", event.as_str())));
        };
        if payload.session_id.is_empty() {
            return Err("session_id missing".to_string());
        }

        let session = match self
            .sessions
            .find_by_external_id(tenant_id, provider_id, &payload.session_id)
            .await
        {
            Ok(session) => session,
            Err(StoreError::NotFound) => {
                return Err(format!("no session for external id {}", payload.session_id))
            }
            Err(e) => return Err(e.to_string()),
        };

        if session.status.is_terminal() {
            if let Some(url) = payload.recording_url.as_deref() {
                self.sessions
                    .attach_artifacts(&session.id, tenant_id, Some(url), None)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            return Ok(Applied::Skipped(format!(
                "session already {}",
                session.status
            )));
        }
        if session.status == target {
            return Ok(Applied::Skipped(format!("session already {target}")));
        }

        let mut extras = StatusExtras {
            recording_url: payload.recording_url.clone(),
            ..StatusExtras::default()
        };
        let written = match event {
            WebhookEventType::CallEnded => {
                self.sessions
                    .close_with(&session.id, tenant_id, payload.reason.as_deref(), &extras)
                    .await
            }
            WebhookEventType::CallAnswered => {
                extras.answered = true;
                self.sessions
                    .update_status_with(&session.id, tenant_id, target, &extras)
                    .await
            }
            WebhookEventType::CallFailed => {
                let code = payload.error_code.as_deref().unwrap_or(CALL_FAILED);
                let message = payload
                    .error_message
                    .as_deref()
                    .or(payload.reason.as_deref())
                    .unwrap_or("provider reported failure");
                extras.error = Some((code.to_string(), message.to_string()));
                self.sessions
                    .update_status_with(&session.id, tenant_id, target, &extras)
                    .await
            }
            _ => {
                self.sessions
                    .update_status_with(&session.id, tenant_id, target, &extras)
                    .await
            }
        };
        let updated = written.map_err(|e| e.to_string())?;

        tracing::info!(
            tenant_id = %tenant_id,
            session_id = %updated.id,
            correlation_id = %updated.correlation_id,
            "Session {} -> {} on {}",
            session.status,
            updated.status,
            event.as_str()
        );
        Ok(Applied::Session(updated))
    }

    // ====== Call control ======

    async fn upstream(&self, session: &CallSession) -> Result<(VoipAdapter, String), CoreError> {
        let (Some(provider_id), Some(external_id)) =
            (session.provider_id.as_deref(), session.external_id.as_deref())
        else {
            return Err(CoreError::Conflict(
                "session has no upstream call".to_string(),
            ));
        };
        let provider = self.registry.get(&session.tenant_id, provider_id).await?;
        Ok((self.adapter(&provider)?, external_id.to_string()))
    }

    pub async fn transfer(&self, id: &str, tenant_id: &str, to_phone: &str) -> Result<CallSession, CoreError> {
        let to_phone = to_phone.trim();
        if to_phone.is_empty() {
            return Err(CoreError::Validation("to_phone is required".to_string()));
        }
        let session = self.sessions.get(id, tenant_id).await?;
        if session.status.is_terminal() {
            return Err(CoreError::Conflict(format!("session already {}", session.status)));
        }

        let (adapter, external_id) = self.upstream(&session).await?;
        adapter.transfer_call(&external_id, to_phone).await?;

        let updated = self.sessions.mark_transferred(id, tenant_id, to_phone).await?;
        tracing::info!(session_id = %id, tenant_id = %tenant_id, "Call transferred to {}", to_phone);
        self.announce(&updated).await;
        Ok(updated)
    }

    /// Hang up upstream (when there is an upstream call) and close the session.
    pub async fn end(&self, id: &str, tenant_id: &str, reason: Option<&str>) -> Result<CallSession, CoreError> {
        let session = self.sessions.get(id, tenant_id).await?;
        if session.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Completed,
            });
        }

        if session.external_id.is_some() {
            let (adapter, external_id) = self.upstream(&session).await?;
            adapter.end_call(&external_id).await?;
        }

        let closed = self.sessions.close(id, tenant_id, reason).await?;
        tracing::info!(session_id = %id, tenant_id = %tenant_id, "Call ended as {}", closed.status);
        self.announce(&closed).await;
        Ok(closed)
    }

    /// Raw provider status for the session's upstream call.
    pub async fn provider_status(&self, id: &str, tenant_id: &str) -> Result<String, CoreError> {
        let session = self.sessions.get(id, tenant_id).await?;
        if session.external_id.is_none() {
            return Ok(UNKNOWN_STATUS.to_string());
        }
        let (adapter, external_id) = self.upstream(&session).await?;
        Ok(adapter.get_call_status(&external_id).await?)
    }

    pub async fn attach_artifacts(
        &self,
        id: &str,
        tenant_id: &str,
        recording_url: Option<&str>,
        transcript_url: Option<&str>,
    ) -> Result<CallSession, CoreError> {
        Ok(self
            .sessions
            .attach_artifacts(id, tenant_id, recording_url, transcript_url)
            .await?)
    }

    // ====== Queries ======

    pub async fn get(&self, id: &str, tenant_id: &str) -> Result<CallSession, CoreError> {
        Ok(self.sessions.get(id, tenant_id).await?)
    }

    pub async fn list(
        &self,
        tenant_id: &str,
        filter: &SessionFilter,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<SessionPage, CoreError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0).max(0);
        let (items, total) = self.sessions.list(tenant_id, filter, limit, offset).await?;
        Ok(SessionPage {
            items,
            total,
            limit,
            offset,
        })
    }

    pub async fn stats(&self, tenant_id: &str) -> Result<SessionStats, CoreError> {
        Ok(self.sessions.stats(tenant_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::models::CallDirection;
    use crate::server::db::memory::MemoryStore;
    use crate::server::db::ProviderStore;
    use crate::server::hub::HubConfig;

    /// Provider store whose listing always breaks.
    struct BrokenProviders;

    #[async_trait]
    impl ProviderStore for BrokenProviders {
        async fn insert_provider(&self, _provider: &VoipProvider) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get_provider(&self, _tenant_id: &str, _id: &str) -> Result<VoipProvider, StoreError> {
            Err(StoreError::NotFound)
        }

        async fn list_providers(&self, _tenant_id: &str) -> Result<Vec<VoipProvider>, StoreError> {
            Err(StoreError::StorageFault("providers table unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_selection_fault_marks_session_failed() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let hub = Hub::start(HubConfig::default(), shutdown.clone());
        let mut watcher = hub.register("t1", "supervisor").await.unwrap();
        let orchestrator = SessionOrchestrator::new(
            store.clone(),
            Arc::new(ProviderRegistry::new(Arc::new(BrokenProviders), false)),
            hub,
            reqwest::Client::new(),
            shutdown,
        );

        let err = orchestrator
            .initiate(
                "t1",
                "u1",
                InitiateCallRequest {
                    to_phone: "+15550001".into(),
                    direction: Some(CallDirection::Outbound),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::StorageFault(_)));

        let (rows, total) = store.list("t1", &SessionFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].status, SessionStatus::Failed);
        assert_eq!(rows[0].error_code.as_deref(), Some(SETUP_FAILED));

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), watcher.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.data["status"], "FAILED");
    }
}
