//! VoIP provider database operations

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::StoreError;
use crate::models::{ProviderCredentials, VoipProvider};

#[derive(sqlx::FromRow)]
struct ProviderRow {
    id: String,
    tenant_id: String,
    name: String,
    kind: String,
    api_url: String,
    api_key: String,
    api_secret: String,
    auth_token: String,
    webhook_secret: Option<String>,
    sender_number: String,
    caller_id: String,
    callback_url: String,
    priority: i32,
    timeout_seconds: i32,
    retry_count: i32,
    is_active: bool,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProviderRow> for VoipProvider {
    type Error = StoreError;

    fn try_from(row: ProviderRow) -> Result<Self, Self::Error> {
        Ok(VoipProvider {
            kind: row.kind.parse().map_err(StoreError::StorageFault)?,
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            api_url: row.api_url,
            credentials: ProviderCredentials {
                api_key: row.api_key,
                api_secret: row.api_secret,
                auth_token: row.auth_token,
                webhook_secret: row.webhook_secret,
            },
            sender_number: row.sender_number,
            caller_id: row.caller_id,
            callback_url: row.callback_url,
            priority: row.priority,
            timeout_seconds: row.timeout_seconds,
            retry_count: row.retry_count,
            is_active: row.is_active,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn insert(pool: &PgPool, provider: &VoipProvider) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO voip_provider (
            id, tenant_id, name, kind, api_url, api_key, api_secret, auth_token,
            webhook_secret, sender_number, caller_id, callback_url, priority,
            timeout_seconds, retry_count, is_active, created_by, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            kind = EXCLUDED.kind,
            api_url = EXCLUDED.api_url,
            api_key = EXCLUDED.api_key,
            api_secret = EXCLUDED.api_secret,
            auth_token = EXCLUDED.auth_token,
            webhook_secret = EXCLUDED.webhook_secret,
            sender_number = EXCLUDED.sender_number,
            caller_id = EXCLUDED.caller_id,
            callback_url = EXCLUDED.callback_url,
            priority = EXCLUDED.priority,
            timeout_seconds = EXCLUDED.timeout_seconds,
            retry_count = EXCLUDED.retry_count,
            is_active = EXCLUDED.is_active,
            updated_at = NOW()
        WHERE voip_provider.tenant_id = EXCLUDED.tenant_id
        "#,
    )
    .bind(&provider.id)
    .bind(&provider.tenant_id)
    .bind(&provider.name)
    .bind(provider.kind.as_str())
    .bind(&provider.api_url)
    .bind(&provider.credentials.api_key)
    .bind(&provider.credentials.api_secret)
    .bind(&provider.credentials.auth_token)
    .bind(&provider.credentials.webhook_secret)
    .bind(&provider.sender_number)
    .bind(&provider.caller_id)
    .bind(&provider.callback_url)
    .bind(provider.priority)
    .bind(provider.timeout_seconds)
    .bind(provider.retry_count)
    .bind(provider.is_active)
    .bind(&provider.created_by)
    .bind(provider.created_at)
    .bind(provider.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &PgPool, tenant_id: &str, id: &str) -> Result<VoipProvider, StoreError> {
    let row = sqlx::query_as::<_, ProviderRow>(
        r#"
        SELECT id, tenant_id, name, kind, api_url, api_key, api_secret, auth_token,
               webhook_secret, sender_number, caller_id, callback_url, priority,
               timeout_seconds, retry_count, is_active, created_by, created_at, updated_at
        FROM voip_provider
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)?;
    VoipProvider::try_from(row)
}

pub async fn list(pool: &PgPool, tenant_id: &str) -> Result<Vec<VoipProvider>, StoreError> {
    sqlx::query_as::<_, ProviderRow>(
        r#"
        SELECT id, tenant_id, name, kind, api_url, api_key, api_secret, auth_token,
               webhook_secret, sender_number, caller_id, callback_url, priority,
               timeout_seconds, retry_count, is_active, created_by, created_at, updated_at
        FROM voip_provider
        WHERE tenant_id = $1
        ORDER BY priority DESC, created_at DESC
        "#,
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(VoipProvider::try_from)
    .collect()
}
