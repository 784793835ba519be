use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewQueueItem, QueueItem, QueueStatus};
use crate::store::Resolution;

pub async fn insert(pool: &PgPool, item: &NewQueueItem) -> Result<QueueItem, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "INSERT INTO dte_contingency_queue
           (id, invoice_id, purchase_id, tipo_dte, codigo_generacion, ambiente,
            failure_stage, failure_reason, failure_timestamp, dte_unsigned, dte_signed,
            max_retries, company_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(item.document.invoice_id())
    .bind(item.document.purchase_id())
    .bind(&item.tipo_dte)
    .bind(&item.codigo_generacion)
    .bind(item.ambiente.code())
    .bind(item.failure_stage.as_str())
    .bind(&item.failure_reason)
    .bind(item.failure_timestamp)
    .bind(&item.dte_unsigned)
    .bind(item.dte_signed.as_deref())
    .bind(item.max_retries)
    .bind(item.company_id)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>("SELECT * FROM dte_contingency_queue WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list(
    pool: &PgPool,
    company_id: Option<Uuid>,
    status: Option<QueueStatus>,
    limit: i64,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM dte_contingency_queue
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

pub async fn list_pending_by_company(
    pool: &PgPool,
    company_id: Uuid,
    limit: i64,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM dte_contingency_queue
         WHERE company_id = $1
           AND status = 'pending'
           AND retry_count < max_retries
         ORDER BY failure_timestamp ASC, id ASC
         LIMIT $2",
    )
    .bind(company_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn list_companies_with_pending(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        "SELECT DISTINCT company_id FROM dte_contingency_queue
         WHERE status = 'pending' AND retry_count < max_retries
         ORDER BY company_id",
    )
    .fetch_all(pool)
    .await
}

pub async fn list_by_event(pool: &PgPool, event_id: Uuid) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM dte_contingency_queue
         WHERE contingency_event_id = $1
         ORDER BY failure_timestamp ASC, id ASC",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await
}

pub async fn list_by_batch(pool: &PgPool, batch_id: Uuid) -> Result<Vec<QueueItem>, sqlx::Error> {
    sqlx::query_as::<_, QueueItem>(
        "SELECT * FROM dte_contingency_queue
         WHERE batch_id = $1
         ORDER BY failure_timestamp ASC, id ASC",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await
}

/// The signature is written once; an item that already has one is left alone.
pub async fn attach_signature(pool: &PgPool, id: Uuid, signed: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE dte_contingency_queue SET dte_signed = $2, updated_at = now()
         WHERE id = $1 AND status = 'pending' AND (dte_signed IS NULL OR dte_signed = '')",
    )
    .bind(id)
    .bind(signed)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn link_to_event(pool: &PgPool, id: Uuid, event_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE dte_contingency_queue
         SET contingency_event_id = $2, status = 'event_created', updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .bind(event_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn link_to_batch(pool: &PgPool, id: Uuid, batch_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE dte_contingency_queue q
         SET batch_id = $2, status = 'batch_created', updated_at = now()
         WHERE q.id = $1
           AND (q.status = 'event_created'
                OR (q.status = 'batch_created'
                    AND EXISTS (SELECT 1 FROM dte_contingency_batches b
                                WHERE b.id = q.batch_id AND b.status = 'failed')))",
    )
    .bind(id)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_submitted(pool: &PgPool, id: Uuid, batch_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE dte_contingency_queue SET status = 'batch_submitted', updated_at = now()
         WHERE id = $1 AND batch_id = $2 AND status = 'batch_created'",
    )
    .bind(id)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn resolve(
    pool: &PgPool,
    codigo_generacion: &str,
    batch_id: Option<Uuid>,
    resolution: &Resolution,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    let (sello, reason) = match resolution {
        Resolution::Success { sello, .. } => (Some(sello.as_str()), None),
        Resolution::Rejected { reason, .. } => (None, Some(reason.as_str())),
    };

    sqlx::query_as::<_, QueueItem>(
        "UPDATE dte_contingency_queue
         SET status = $3,
             sello_recibido = COALESCE($4, sello_recibido),
             rejection_reason = COALESCE($5, rejection_reason),
             hacienda_response = $6,
             completed_at = now(),
             updated_at = now()
         WHERE upper(codigo_generacion) = upper($1)
           AND ($2::uuid IS NULL OR batch_id = $2)
           AND status = 'batch_submitted'
         RETURNING *",
    )
    .bind(codigo_generacion)
    .bind(batch_id)
    .bind(resolution.status().as_str())
    .bind(sello)
    .bind(reason)
    .bind(resolution.response())
    .fetch_all(pool)
    .await
}

pub async fn increment_retry(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE dte_contingency_queue SET retry_count = retry_count + 1, updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn reset_retries(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE dte_contingency_queue SET retry_count = 0, updated_at = now()
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
