//! Call session database operations

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::PgPool;

use super::StoreError;
use crate::models::{CallSession, SessionFilter, SessionStats, SessionStatus};

const SELECT_SESSION: &str = r#"
    SELECT id, tenant_id, initiated_by, from_phone, to_phone, direction,
           provider_id, external_id, correlation_id, status,
           started_at, ended_at, duration_seconds, ring_seconds, answer_seconds,
           disconnect_reason, error_code, error_message, recording_url, transcript_url,
           agent_id, lead_id, contact_name, contact_email, is_transferred, transfer_to,
           metadata, created_at, updated_at, deleted_at
    FROM click_to_call_session
"#;

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    tenant_id: String,
    initiated_by: String,
    from_phone: String,
    to_phone: String,
    direction: String,
    provider_id: Option<String>,
    external_id: Option<String>,
    correlation_id: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
    ring_seconds: Option<i64>,
    answer_seconds: Option<i64>,
    disconnect_reason: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    recording_url: Option<String>,
    transcript_url: Option<String>,
    agent_id: Option<String>,
    lead_id: Option<String>,
    contact_name: Option<String>,
    contact_email: Option<String>,
    is_transferred: bool,
    transfer_to: Option<String>,
    metadata: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<SessionRow> for CallSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(CallSession {
            status: row.status.parse().map_err(StoreError::StorageFault)?,
            direction: row.direction.parse().map_err(StoreError::StorageFault)?,
            id: row.id,
            tenant_id: row.tenant_id,
            initiated_by: row.initiated_by,
            from_phone: row.from_phone,
            to_phone: row.to_phone,
            provider_id: row.provider_id,
            external_id: row.external_id,
            correlation_id: row.correlation_id,
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration_seconds: row.duration_seconds,
            ring_seconds: row.ring_seconds,
            answer_seconds: row.answer_seconds,
            disconnect_reason: row.disconnect_reason,
            error_code: row.error_code,
            error_message: row.error_message,
            recording_url: row.recording_url,
            transcript_url: row.transcript_url,
            agent_id: row.agent_id,
            lead_id: row.lead_id,
            contact_name: row.contact_name,
            contact_email: row.contact_email,
            is_transferred: row.is_transferred,
            transfer_to: row.transfer_to,
            metadata: row.metadata.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

pub async fn insert(pool: &PgPool, session: &CallSession) -> Result<CallSession, StoreError> {
    sqlx::query(
        r#"
        INSERT INTO click_to_call_session (
            id, tenant_id, initiated_by, from_phone, to_phone, direction,
            provider_id, external_id, correlation_id, status,
            agent_id, lead_id, contact_name, contact_email, metadata,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(&session.id)
    .bind(&session.tenant_id)
    .bind(&session.initiated_by)
    .bind(&session.from_phone)
    .bind(&session.to_phone)
    .bind(session.direction.as_str())
    .bind(&session.provider_id)
    .bind(&session.external_id)
    .bind(&session.correlation_id)
    .bind(session.status.as_str())
    .bind(&session.agent_id)
    .bind(&session.lead_id)
    .bind(&session.contact_name)
    .bind(&session.contact_email)
    .bind(Json(&session.metadata))
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(pool)
    .await?;

    get(pool, &session.id, &session.tenant_id).await
}

pub async fn get(pool: &PgPool, id: &str, tenant_id: &str) -> Result<CallSession, StoreError> {
    let sql = format!("{SELECT_SESSION} WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL");
    let row = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound)?;
    CallSession::try_from(row)
}

pub async fn find_by_external_id(
    pool: &PgPool,
    tenant_id: &str,
    provider_id: &str,
    external_id: &str,
) -> Result<CallSession, StoreError> {
    let sql = format!(
        "{SELECT_SESSION} WHERE tenant_id = $1 AND external_id = $2 AND provider_id = $3 \
         AND deleted_at IS NULL ORDER BY created_at DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(tenant_id)
        .bind(external_id)
        .bind(provider_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound)?;
    CallSession::try_from(row)
}

pub async fn list(
    pool: &PgPool,
    tenant_id: &str,
    filter: &SessionFilter,
    limit: i64,
    offset: i64,
) -> Result<(Vec<CallSession>, i64), StoreError> {
    const WHERE: &str = r#"
        WHERE tenant_id = $1
          AND deleted_at IS NULL
          AND ($2::text IS NULL OR status = $2)
          AND ($3::text IS NULL OR agent_id = $3)
          AND ($4::text IS NULL OR lead_id = $4)
    "#;
    let status = filter.status.map(|s| s.as_str());

    let sql = format!("{SELECT_SESSION} {WHERE} ORDER BY created_at DESC LIMIT $5 OFFSET $6");
    let rows = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(tenant_id)
        .bind(status)
        .bind(&filter.agent_id)
        .bind(&filter.lead_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let count_sql = format!("SELECT COUNT(*) FROM click_to_call_session {WHERE}");
    let total: i64 = sqlx::query_scalar(&count_sql)
        .bind(tenant_id)
        .bind(status)
        .bind(&filter.agent_id)
        .bind(&filter.lead_id)
        .fetch_one(pool)
        .await?;

    let items = rows
        .into_iter()
        .map(CallSession::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((items, total))
}

/// Load a session under `FOR UPDATE`, apply `f`, persist the result, commit.
///
/// If `f` refuses the change the transaction is rolled back and the row is
/// left as it was.
pub async fn mutate<F>(
    pool: &PgPool,
    id: &str,
    tenant_id: &str,
    f: F,
) -> Result<CallSession, StoreError>
where
    F: FnOnce(&mut CallSession, DateTime<Utc>) -> Result<(), StoreError> + Send,
{
    let mut tx = pool.begin().await?;

    let sql = format!(
        "{SELECT_SESSION} WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL FOR UPDATE"
    );
    let row = sqlx::query_as::<_, SessionRow>(&sql)
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;

    let mut session = CallSession::try_from(row)?;
    f(&mut session, Utc::now())?;

    sqlx::query(
        r#"
        UPDATE click_to_call_session
        SET from_phone = $3,
            provider_id = $4,
            external_id = $5,
            status = $6,
            started_at = $7,
            ended_at = $8,
            duration_seconds = $9,
            ring_seconds = $10,
            answer_seconds = $11,
            disconnect_reason = $12,
            error_code = $13,
            error_message = $14,
            recording_url = $15,
            transcript_url = $16,
            is_transferred = $17,
            transfer_to = $18,
            updated_at = $19
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(&session.id)
    .bind(&session.tenant_id)
    .bind(&session.from_phone)
    .bind(&session.provider_id)
    .bind(&session.external_id)
    .bind(session.status.as_str())
    .bind(session.started_at)
    .bind(session.ended_at)
    .bind(session.duration_seconds)
    .bind(session.ring_seconds)
    .bind(session.answer_seconds)
    .bind(&session.disconnect_reason)
    .bind(&session.error_code)
    .bind(&session.error_message)
    .bind(&session.recording_url)
    .bind(&session.transcript_url)
    .bind(session.is_transferred)
    .bind(&session.transfer_to)
    .bind(session.updated_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(session)
}

pub async fn stats(pool: &PgPool, tenant_id: &str) -> Result<SessionStats, StoreError> {
    let rows: Vec<(String, i64, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*), COALESCE(SUM(duration_seconds), 0)::BIGINT
        FROM click_to_call_session
        WHERE tenant_id = $1 AND deleted_at IS NULL
        GROUP BY status
        "#,
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    let mut stats = SessionStats::default();
    for (status, count, duration) in rows {
        let status: SessionStatus = status.parse().map_err(StoreError::StorageFault)?;
        stats.total_calls += count;
        stats.by_status.insert(status.as_str().to_string(), count);
        match status {
            SessionStatus::Completed => {
                stats.completed_calls += count;
                stats.total_duration += duration;
            }
            SessionStatus::Failed => stats.failed_calls += count,
            _ => {}
        }
    }
    if stats.completed_calls > 0 {
        stats.average_duration = stats.total_duration / stats.completed_calls;
    }
    Ok(stats)
}
