use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{BatchStatus, ContingencyBatch, NewBatch};

/// Returns `None` if the event already has a live batch (partial unique index).
pub async fn insert(pool: &PgPool, batch: &NewBatch) -> Result<Option<ContingencyBatch>, sqlx::Error> {
    sqlx::query_as::<_, ContingencyBatch>(
        "INSERT INTO dte_contingency_batches
           (id, contingency_event_id, company_id, ambiente, status, total_dtes)
         VALUES ($1, $2, $3, $4, 'pending', $5)
         ON CONFLICT (contingency_event_id) WHERE status <> 'failed' DO NOTHING
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(batch.contingency_event_id)
    .bind(batch.company_id)
    .bind(batch.ambiente.code())
    .bind(batch.total_dtes)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<ContingencyBatch>, sqlx::Error> {
    sqlx::query_as::<_, ContingencyBatch>("SELECT * FROM dte_contingency_batches WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list(
    pool: &PgPool,
    company_id: Option<Uuid>,
    status: Option<BatchStatus>,
    limit: i64,
) -> Result<Vec<ContingencyBatch>, sqlx::Error> {
    sqlx::query_as::<_, ContingencyBatch>(
        "SELECT * FROM dte_contingency_batches
         WHERE ($1::uuid IS NULL OR company_id = $1)
           AND ($2::text IS NULL OR status = $2)
         ORDER BY created_at DESC, id DESC
         LIMIT $3",
    )
    .bind(company_id)
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn list_submitted(pool: &PgPool) -> Result<Vec<ContingencyBatch>, sqlx::Error> {
    sqlx::query_as::<_, ContingencyBatch>(
        "SELECT * FROM dte_contingency_batches
         WHERE status = 'submitted'
         ORDER BY submitted_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await
}

pub async fn mark_submitted(
    pool: &PgPool,
    id: Uuid,
    codigo_lote: &str,
    response: &Value,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE dte_contingency_batches
         SET status = 'submitted', codigo_lote = $2, hacienda_response = $3, submitted_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .bind(codigo_lote)
    .bind(response)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    response: Option<&Value>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE dte_contingency_batches
         SET status = 'failed', hacienda_response = COALESCE($2, hacienda_response)
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .bind(response)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Counts only move up; completion is written at most once.
pub async fn record_progress(
    pool: &PgPool,
    id: Uuid,
    processed: i32,
    rejected: i32,
    response: &Value,
    complete: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE dte_contingency_batches
         SET processed_count = GREATEST(processed_count, $2),
             rejected_count = GREATEST(rejected_count, $3),
             hacienda_response = $4,
             status = CASE WHEN $5 THEN 'completed' ELSE status END,
             completed_at = CASE WHEN $5 THEN now() ELSE completed_at END
         WHERE id = $1 AND status = 'submitted'",
    )
    .bind(id)
    .bind(processed)
    .bind(rejected)
    .bind(response)
    .bind(complete)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
