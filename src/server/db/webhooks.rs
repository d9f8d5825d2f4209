//! Webhook audit log database operations

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::StoreError;
use crate::models::{ProcessingStatus, WebhookLog};

#[derive(sqlx::FromRow)]
struct WebhookLogRow {
    id: String,
    tenant_id: String,
    provider_id: String,
    event_type: String,
    raw_payload: String,
    signature: Option<String>,
    signature_valid: bool,
    processing_status: String,
    error: Option<String>,
    received_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<WebhookLogRow> for WebhookLog {
    type Error = StoreError;

    fn try_from(row: WebhookLogRow) -> Result<Self, Self::Error> {
        Ok(WebhookLog {
            processing_status: row.processing_status.parse().map_err(StoreError::StorageFault)?,
            id: row.id,
            tenant_id: row.tenant_id,
            provider_id: row.provider_id,
            event_type: row.event_type,
            raw_payload: row.raw_payload,
            signature: row.signature,
            signature_valid: row.signature_valid,
            error: row.error,
            received_at: row.received_at,
            processed_at: row.processed_at,
        })
    }
}

pub async fn insert(pool: &PgPool, entry: &WebhookLog) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO click_to_call_webhook_log (
            id, tenant_id, provider_id, event_type, raw_payload, signature,
            signature_valid, processing_status, error, received_at, processed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.tenant_id)
    .bind(&entry.provider_id)
    .bind(&entry.event_type)
    .bind(&entry.raw_payload)
    .bind(&entry.signature)
    .bind(entry.signature_valid)
    .bind(entry.processing_status.as_str())
    .bind(&entry.error)
    .bind(entry.received_at)
    .bind(entry.processed_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark(
    pool: &PgPool,
    id: &str,
    tenant_id: &str,
    status: ProcessingStatus,
    error: Option<&str>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE click_to_call_webhook_log
        SET processing_status = $3, error = $4, processed_at = NOW()
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(status.as_str())
    .bind(error)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub async fn list(pool: &PgPool, tenant_id: &str) -> Result<Vec<WebhookLog>, StoreError> {
    sqlx::query_as::<_, WebhookLogRow>(
        r#"
        SELECT id, tenant_id, provider_id, event_type, raw_payload, signature,
               signature_valid, processing_status, error, received_at, processed_at
        FROM click_to_call_webhook_log
        WHERE tenant_id = $1
        ORDER BY received_at ASC
        "#,
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(WebhookLog::try_from)
    .collect()
}
