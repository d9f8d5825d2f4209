//! In-process store used by tests and when no database is configured.
//!
//! Each map sits behind its own `RwLock`; a session mutation holds the write
//! lock for the whole read-modify-write so transitions are linearised the
//! same way `FOR UPDATE` does in PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{lifecycle, AiUsageStore, ProviderStore, SessionStore, StoreError};
use crate::models::{
    AiUsageRecord, AiUsageSummary, CallSession, ProcessingStatus, SessionFilter, SessionStats,
    SessionStatus, SessionTimings, StatusExtras, VoipProvider, WebhookLog,
};

#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, CallSession>>,
    webhook_logs: RwLock<Vec<WebhookLog>>,
    providers: RwLock<HashMap<String, VoipProvider>>,
    ai_usage: RwLock<Vec<AiUsageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn mutate<F>(&self, id: &str, tenant_id: &str, f: F) -> Result<CallSession, StoreError>
    where
        F: FnOnce(&mut CallSession, DateTime<Utc>) -> Result<(), StoreError> + Send,
    {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(id)
            .filter(|s| s.tenant_id == tenant_id && s.deleted_at.is_none())
            .ok_or(StoreError::NotFound)?;

        // Work on a copy so a refused change leaves the row untouched.
        let mut updated = stored.clone();
        f(&mut updated, Utc::now())?;
        *stored = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: &CallSession) -> Result<CallSession, StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::StorageFault(format!(
                "duplicate session id {}",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(session.clone())
    }

    async fn get(&self, id: &str, tenant_id: &str) -> Result<CallSession, StoreError> {
        self.sessions
            .read()
            .await
            .get(id)
            .filter(|s| s.tenant_id == tenant_id && s.deleted_at.is_none())
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(
        &self,
        tenant_id: &str,
        filter: &SessionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<CallSession>, i64), StoreError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<&CallSession> = sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.deleted_at.is_none() && filter.matches(s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn update_status_with(
        &self,
        id: &str,
        tenant_id: &str,
        status: SessionStatus,
        extras: &StatusExtras,
    ) -> Result<CallSession, StoreError> {
        self.mutate(id, tenant_id, |s, now| {
            lifecycle::apply_status_with(s, status, extras, now)
        })
        .await
    }

    async fn update_timing(
        &self,
        id: &str,
        tenant_id: &str,
        timings: &SessionTimings,
    ) -> Result<CallSession, StoreError> {
        self.mutate(id, tenant_id, |s, now| lifecycle::apply_timing(s, timings, now))
            .await
    }

    async fn close_with(
        &self,
        id: &str,
        tenant_id: &str,
        disconnect_reason: Option<&str>,
        extras: &StatusExtras,
    ) -> Result<CallSession, StoreError> {
        self.mutate(id, tenant_id, |s, now| {
            lifecycle::apply_close_with(s, disconnect_reason, extras, now)
        })
        .await
    }

    async fn set_routing(
        &self,
        id: &str,
        tenant_id: &str,
        provider_id: &str,
        from_phone: &str,
    ) -> Result<CallSession, StoreError> {
        self.mutate(id, tenant_id, |s, now| {
            lifecycle::apply_routing(s, provider_id, from_phone, now)
        })
        .await
    }

    async fn set_external_id(
        &self,
        id: &str,
        tenant_id: &str,
        provider_id: &str,
        external_id: &str,
    ) -> Result<CallSession, StoreError> {
        self.mutate(id, tenant_id, |s, now| {
            lifecycle::apply_external_id(s, provider_id, external_id, now)
        })
        .await
    }

    async fn find_by_external_id(
        &self,
        tenant_id: &str,
        provider_id: &str,
        external_id: &str,
    ) -> Result<CallSession, StoreError> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| {
                s.tenant_id == tenant_id
                    && s.deleted_at.is_none()
                    && s.provider_id.as_deref() == Some(provider_id)
                    && s.external_id.as_deref() == Some(external_id)
            })
            .max_by_key(|s| s.created_at)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn mark_transferred(
        &self,
        id: &str,
        tenant_id: &str,
        to_phone: &str,
    ) -> Result<CallSession, StoreError> {
        self.mutate(id, tenant_id, |s, now| lifecycle::apply_transfer(s, to_phone, now))
            .await
    }

    async fn attach_artifacts(
        &self,
        id: &str,
        tenant_id: &str,
        recording_url: Option<&str>,
        transcript_url: Option<&str>,
    ) -> Result<CallSession, StoreError> {
        self.mutate(id, tenant_id, |s, now| {
            lifecycle::apply_artifacts(s, recording_url, transcript_url, now);
            Ok(())
        })
        .await
    }

    async fn stats(&self, tenant_id: &str) -> Result<SessionStats, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(SessionStats::from_sessions(
            sessions
                .values()
                .filter(|s| s.tenant_id == tenant_id && s.deleted_at.is_none()),
        ))
    }

    async fn save_webhook_log(&self, entry: &WebhookLog) -> Result<(), StoreError> {
        self.webhook_logs.write().await.push(entry.clone());
        Ok(())
    }

    async fn mark_webhook_log(
        &self,
        id: &str,
        tenant_id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut logs = self.webhook_logs.write().await;
        let entry = logs
            .iter_mut()
            .find(|l| l.id == id && l.tenant_id == tenant_id)
            .ok_or(StoreError::NotFound)?;
        entry.processing_status = status;
        entry.error = error.map(str::to_string);
        entry.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn list_webhook_logs(&self, tenant_id: &str) -> Result<Vec<WebhookLog>, StoreError> {
        Ok(self
            .webhook_logs
            .read()
            .await
            .iter()
            .filter(|l| l.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProviderStore for MemoryStore {
    async fn insert_provider(&self, provider: &VoipProvider) -> Result<(), StoreError> {
        let mut providers = self.providers.write().await;
        if let Some(existing) = providers.get(&provider.id) {
            if existing.tenant_id != provider.tenant_id {
                return Err(StoreError::StorageFault(format!(
                    "provider id {} belongs to another tenant",
                    provider.id
                )));
            }
        }
        providers.insert(provider.id.clone(), provider.clone());
        Ok(())
    }

    async fn get_provider(&self, tenant_id: &str, id: &str) -> Result<VoipProvider, StoreError> {
        self.providers
            .read()
            .await
            .get(id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_providers(&self, tenant_id: &str) -> Result<Vec<VoipProvider>, StoreError> {
        let mut providers: Vec<VoipProvider> = self
            .providers
            .read()
            .await
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        providers.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(providers)
    }
}

#[async_trait]
impl AiUsageStore for MemoryStore {
    async fn record_usage(&self, record: &AiUsageRecord) -> Result<(), StoreError> {
        self.ai_usage.write().await.push(record.clone());
        Ok(())
    }

    async fn tenant_usage(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AiUsageSummary, StoreError> {
        let usage = self.ai_usage.read().await;
        let mut summary = AiUsageSummary {
            total_requests: 0,
            total_tokens: 0,
            total_cost: 0.0,
            period_start: start,
            period_end: end,
        };
        for record in usage
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.created_at >= start && r.created_at <= end)
        {
            summary.total_requests += 1;
            summary.total_tokens += record.tokens_used;
            summary.total_cost += record.cost;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AiPriority, AiRequest, CallDirection, InitiateCallRequest};

    fn new_session(tenant: &str) -> CallSession {
        CallSession::new(
            tenant,
            "u1",
            &InitiateCallRequest {
                to_phone: "+15550001".into(),
                direction: Some(CallDirection::Outbound),
                agent_id: Some("a1".into()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_cross_tenant_access_is_not_found() {
        let store = MemoryStore::new();
        let session = store.create(&new_session("t1")).await.unwrap();

        assert!(matches!(store.get(&session.id, "t2").await, Err(StoreError::NotFound)));
        assert!(matches!(
            store.update_status(&session.id, "t2", SessionStatus::Connecting).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.close(&session.id, "t2", None).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.attach_artifacts(&session.id, "t2", Some("x"), None).await,
            Err(StoreError::NotFound)
        ));
        // Untouched for the owner
        let owned = store.get(&session.id, "t1").await.unwrap();
        assert_eq!(owned.status, SessionStatus::Initiated);
    }

    #[tokio::test]
    async fn test_refused_transition_keeps_row() {
        let store = MemoryStore::new();
        let session = store.create(&new_session("t1")).await.unwrap();
        let err = store
            .update_status(&session.id, "t1", SessionStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(store.get(&session.id, "t1").await.unwrap(), session);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = MemoryStore::new();
        for _ in 0..5 {
            store.create(&new_session("t1")).await.unwrap();
        }
        let mut other_agent = new_session("t1");
        other_agent.agent_id = Some("a2".into());
        store.create(&other_agent).await.unwrap();
        store.create(&new_session("t2")).await.unwrap();

        let filter = SessionFilter {
            agent_id: Some("a1".into()),
            ..Default::default()
        };
        let (page, total) = store.list("t1", &filter, 2, 0).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);

        let (all, total_all) = store.list("t1", &SessionFilter::default(), 50, 0).await.unwrap();
        assert_eq!(total_all, 6);
        assert!(all.iter().all(|s| s.tenant_id == "t1"));

        let mut deleted = new_session("t1");
        deleted.deleted_at = Some(Utc::now());
        store.create(&deleted).await.unwrap();
        let (_, after_delete) = store.list("t1", &SessionFilter::default(), 50, 0).await.unwrap();
        assert_eq!(after_delete, 6);
    }

    #[tokio::test]
    async fn test_find_by_external_id_is_tenant_and_provider_scoped() {
        let store = MemoryStore::new();
        let session = store.create(&new_session("t1")).await.unwrap();
        store.set_external_id(&session.id, "t1", "p1", "CA9").await.unwrap();

        assert_eq!(
            store.find_by_external_id("t1", "p1", "CA9").await.unwrap().id,
            session.id
        );
        assert!(matches!(
            store.find_by_external_id("t2", "p1", "CA9").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.find_by_external_id("t1", "p2", "CA9").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_status_with_extras_is_one_write() {
        let store = MemoryStore::new();
        let session = store.create(&new_session("t1")).await.unwrap();

        let failed = store
            .update_status_with(
                &session.id,
                "t1",
                SessionStatus::Failed,
                &StatusExtras::error("PROVIDER_ERROR", "HTTP 500"),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, SessionStatus::Failed);
        assert_eq!(failed.error_code.as_deref(), Some("PROVIDER_ERROR"));

        // A refused change leaves the error fields as they were too.
        let err = store
            .update_status_with(
                &session.id,
                "t1",
                SessionStatus::Failed,
                &StatusExtras::error("OTHER", "late"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(store.get(&session.id, "t1").await.unwrap(), failed);
    }

    #[tokio::test]
    async fn test_update_timing_rejects_negative_durations() {
        let store = MemoryStore::new();
        let session = store.create(&new_session("t1")).await.unwrap();

        let timed = store
            .update_timing(
                &session.id,
                "t1",
                &SessionTimings {
                    ring_seconds: Some(4),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(timed.ring_seconds, Some(4));

        let err = store
            .update_timing(
                &session.id,
                "t1",
                &SessionTimings {
                    answer_seconds: Some(-1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTiming(_)));
        assert_eq!(store.get(&session.id, "t1").await.unwrap().answer_seconds, None);
    }

    #[tokio::test]
    async fn test_webhook_log_marking() {
        let store = MemoryStore::new();
        let log = WebhookLog::new("t1", "p1", br#"{"event_type":"CALL_RINGING"}"#, None);
        store.save_webhook_log(&log).await.unwrap();
        store
            .mark_webhook_log(&log.id, "t1", ProcessingStatus::Processed, None)
            .await
            .unwrap();
        assert!(matches!(
            store.mark_webhook_log(&log.id, "t2", ProcessingStatus::Failed, None).await,
            Err(StoreError::NotFound)
        ));

        let logs = store.list_webhook_logs("t1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].processing_status, ProcessingStatus::Processed);
        assert!(logs[0].processed_at.is_some());
    }

    #[tokio::test]
    async fn test_usage_summary_window() {
        let store = MemoryStore::new();
        let req = AiRequest {
            tenant_id: "t1".into(),
            query: "q".into(),
            context: serde_json::Value::Null,
            priority: AiPriority::Normal,
        };
        store.record_usage(&AiUsageRecord::new(&req, "a", 100, 0.2, 10)).await.unwrap();
        store.record_usage(&AiUsageRecord::new(&req, "b", 50, 0.1, 10)).await.unwrap();

        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now() + chrono::Duration::hours(1);
        let summary = store.tenant_usage("t1", start, end).await.unwrap();
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.total_tokens, 150);
        assert!((summary.total_cost - 0.3).abs() < 1e-9);

        let other = store.tenant_usage("t2", start, end).await.unwrap();
        assert_eq!(other.total_requests, 0);
    }
}
