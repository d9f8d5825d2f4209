//! Database access layer using sqlx with PostgreSQL
//!
//! The core talks to storage through three traits so the same orchestrators
//! run against PostgreSQL in production and an in-memory store in tests or
//! when no `DATABASE_URL` is configured.
//!
//! - [`SessionStore`]: call sessions and the webhook audit log
//! - [`ProviderStore`]: VoIP provider rows
//! - [`AiUsageStore`]: AI usage accounting

pub mod lifecycle;
pub mod memory;
pub mod sessions;
pub mod providers;
pub mod webhooks;
pub mod ai_usage;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::models::{
    AiUsageRecord, AiUsageSummary, CallSession, ProcessingStatus, SessionFilter, SessionStats,
    SessionStatus, SessionTimings, StatusExtras, VoipProvider, WebhookLog,
};

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found")]
    NotFound,

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    #[error("External id already assigned")]
    ConflictingExternalId,

    #[error("Session is in a terminal state")]
    Terminal,

    #[error("Invalid timing: {0}")]
    InvalidTiming(String),

    #[error("Storage fault: {0}")]
    StorageFault(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::StorageFault(other.to_string()),
        }
    }
}

/// Durable call sessions. Every method is scoped by `tenant_id`; rows of
/// other tenants behave as absent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &CallSession) -> Result<CallSession, StoreError>;

    async fn get(&self, id: &str, tenant_id: &str) -> Result<CallSession, StoreError>;

    /// Newest first; soft-deleted rows are excluded. Returns `(items, total)`.
    async fn list(
        &self,
        tenant_id: &str,
        filter: &SessionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<CallSession>, i64), StoreError>;

    async fn update_status(
        &self,
        id: &str,
        tenant_id: &str,
        status: SessionStatus,
    ) -> Result<CallSession, StoreError> {
        self.update_status_with(id, tenant_id, status, &StatusExtras::default())
            .await
    }

    /// Status change and `extras` in one write. A refused transition writes
    /// nothing.
    async fn update_status_with(
        &self,
        id: &str,
        tenant_id: &str,
        status: SessionStatus,
        extras: &StatusExtras,
    ) -> Result<CallSession, StoreError>;

    async fn update_timing(
        &self,
        id: &str,
        tenant_id: &str,
        timings: &SessionTimings,
    ) -> Result<CallSession, StoreError>;

    async fn close(
        &self,
        id: &str,
        tenant_id: &str,
        disconnect_reason: Option<&str>,
    ) -> Result<CallSession, StoreError> {
        self.close_with(id, tenant_id, disconnect_reason, &StatusExtras::default())
            .await
    }

    async fn close_with(
        &self,
        id: &str,
        tenant_id: &str,
        disconnect_reason: Option<&str>,
        extras: &StatusExtras,
    ) -> Result<CallSession, StoreError>;

    async fn set_routing(
        &self,
        id: &str,
        tenant_id: &str,
        provider_id: &str,
        from_phone: &str,
    ) -> Result<CallSession, StoreError>;

    async fn set_external_id(
        &self,
        id: &str,
        tenant_id: &str,
        provider_id: &str,
        external_id: &str,
    ) -> Result<CallSession, StoreError>;

    /// The session a provider knows as `external_id`. Ids are only unique
    /// per provider, so another provider's call never matches.
    async fn find_by_external_id(
        &self,
        tenant_id: &str,
        provider_id: &str,
        external_id: &str,
    ) -> Result<CallSession, StoreError>;

    async fn mark_transferred(
        &self,
        id: &str,
        tenant_id: &str,
        to_phone: &str,
    ) -> Result<CallSession, StoreError>;

    async fn attach_artifacts(
        &self,
        id: &str,
        tenant_id: &str,
        recording_url: Option<&str>,
        transcript_url: Option<&str>,
    ) -> Result<CallSession, StoreError>;

    async fn stats(&self, tenant_id: &str) -> Result<SessionStats, StoreError>;

    async fn save_webhook_log(&self, entry: &WebhookLog) -> Result<(), StoreError>;

    async fn mark_webhook_log(
        &self,
        id: &str,
        tenant_id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn list_webhook_logs(&self, tenant_id: &str) -> Result<Vec<WebhookLog>, StoreError>;
}

#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn insert_provider(&self, provider: &VoipProvider) -> Result<(), StoreError>;

    async fn get_provider(&self, tenant_id: &str, id: &str) -> Result<VoipProvider, StoreError>;

    /// All providers of a tenant, `priority DESC, created_at DESC`.
    async fn list_providers(&self, tenant_id: &str) -> Result<Vec<VoipProvider>, StoreError>;
}

#[async_trait]
pub trait AiUsageStore: Send + Sync {
    async fn record_usage(&self, record: &AiUsageRecord) -> Result<(), StoreError>;

    async fn tenant_usage(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AiUsageSummary, StoreError>;
}

/// One backend viewed through each of the store traits.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub providers: Arc<dyn ProviderStore>,
    pub ai_usage: Arc<dyn AiUsageStore>,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: SessionStore + ProviderStore + AiUsageStore + 'static,
    {
        Self {
            sessions: backend.clone(),
            providers: backend.clone(),
            ai_usage: backend,
        }
    }
}

/// PostgreSQL-backed store; each trait method delegates to the query module
/// for its table.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create(&self, session: &CallSession) -> Result<CallSession, StoreError> {
        sessions::insert(&self.pool, session).await
    }

    async fn get(&self, id: &str, tenant_id: &str) -> Result<CallSession, StoreError> {
        sessions::get(&self.pool, id, tenant_id).await
    }

    async fn list(
        &self,
        tenant_id: &str,
        filter: &SessionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<CallSession>, i64), StoreError> {
        sessions::list(&self.pool, tenant_id, filter, limit, offset).await
    }

    async fn update_status_with(
        &self,
        id: &str,
        tenant_id: &str,
        status: SessionStatus,
        extras: &StatusExtras,
    ) -> Result<CallSession, StoreError> {
        sessions::mutate(&self.pool, id, tenant_id, |s, now| {
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
        sessions::mutate(&self.pool, id, tenant_id, |s, now| {
            lifecycle::apply_timing(s, timings, now)
        })
        .await
    }

    async fn close_with(
        &self,
        id: &str,
        tenant_id: &str,
        disconnect_reason: Option<&str>,
        extras: &StatusExtras,
    ) -> Result<CallSession, StoreError> {
        sessions::mutate(&self.pool, id, tenant_id, |s, now| {
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
        sessions::mutate(&self.pool, id, tenant_id, |s, now| {
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
        sessions::mutate(&self.pool, id, tenant_id, |s, now| {
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
        sessions::find_by_external_id(&self.pool, tenant_id, provider_id, external_id).await
    }

    async fn mark_transferred(
        &self,
        id: &str,
        tenant_id: &str,
        to_phone: &str,
    ) -> Result<CallSession, StoreError> {
        sessions::mutate(&self.pool, id, tenant_id, |s, now| {
            lifecycle::apply_transfer(s, to_phone, now)
        })
        .await
    }

    async fn attach_artifacts(
        &self,
        id: &str,
        tenant_id: &str,
        recording_url: Option<&str>,
        transcript_url: Option<&str>,
    ) -> Result<CallSession, StoreError> {
        sessions::mutate(&self.pool, id, tenant_id, |s, now| {
            lifecycle::apply_artifacts(s, recording_url, transcript_url, now);
            Ok(())
        })
        .await
    }

    async fn stats(&self, tenant_id: &str) -> Result<SessionStats, StoreError> {
        sessions::stats(&self.pool, tenant_id).await
    }

    async fn save_webhook_log(&self, entry: &WebhookLog) -> Result<(), StoreError> {
        webhooks::insert(&self.pool, entry).await
    }

    async fn mark_webhook_log(
        &self,
        id: &str,
        tenant_id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        webhooks::mark(&self.pool, id, tenant_id, status, error).await
    }

    async fn list_webhook_logs(&self, tenant_id: &str) -> Result<Vec<WebhookLog>, StoreError> {
        webhooks::list(&self.pool, tenant_id).await
    }
}

#[async_trait]
impl ProviderStore for PgStore {
    async fn insert_provider(&self, provider: &VoipProvider) -> Result<(), StoreError> {
        providers::insert(&self.pool, provider).await
    }

    async fn get_provider(&self, tenant_id: &str, id: &str) -> Result<VoipProvider, StoreError> {
        providers::get(&self.pool, tenant_id, id).await
    }

    async fn list_providers(&self, tenant_id: &str) -> Result<Vec<VoipProvider>, StoreError> {
        providers::list(&self.pool, tenant_id).await
    }
}

#[async_trait]
impl AiUsageStore for PgStore {
    async fn record_usage(&self, record: &AiUsageRecord) -> Result<(), StoreError> {
        ai_usage::insert(&self.pool, record).await
    }

    async fn tenant_usage(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AiUsageSummary, StoreError> {
        ai_usage::summary(&self.pool, tenant_id, start, end).await
    }
}
