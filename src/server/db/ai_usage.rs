//! AI usage accounting database operations

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::StoreError;
use crate::models::{AiUsageRecord, AiUsageSummary};

pub async fn insert(pool: &PgPool, record: &AiUsageRecord) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ai_request_log (
            tenant_id, query, provider, tokens_used, processing_time_ms, cost, priority, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&record.tenant_id)
    .bind(&record.query)
    .bind(&record.provider)
    .bind(record.tokens_used)
    .bind(record.processing_time_ms)
    .bind(record.cost)
    .bind(record.priority.as_str())
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn summary(
    pool: &PgPool,
    tenant_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<AiUsageSummary, StoreError> {
    let (total_requests, total_tokens, total_cost): (i64, i64, f64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(tokens_used), 0)::BIGINT,
               COALESCE(SUM(cost), 0)::DOUBLE PRECISION
        FROM ai_request_log
        WHERE tenant_id = $1 AND created_at BETWEEN $2 AND $3
        "#,
    )
    .bind(tenant_id)
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await?;

    Ok(AiUsageSummary {
        total_requests,
        total_tokens,
        total_cost,
        period_start: start,
        period_end: end,
    })
}
