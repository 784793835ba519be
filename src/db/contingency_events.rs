use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ContingencyEvent, NewContingencyEvent};

/// Events are only ever stored once the authority has accepted them.
pub async fn insert_accepted(
    pool: &PgPool,
    event: &NewContingencyEvent,
) -> Result<ContingencyEvent, sqlx::Error> {
    sqlx::query_as::<_, ContingencyEvent>(
        "INSERT INTO dte_contingency_events
           (id, codigo_generacion, company_id, ambiente, status, dte_count,
            fecha_inicio, fecha_fin, tipo_contingencia, motivo_contingencia,
            event_unsigned, event_signed, sello_recibido, hacienda_response, accepted_at)
         VALUES ($1, $2, $3, $4, 'accepted', $5, $6, $7, $8, $9, $10, $11, $12, $13, now())
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&event.codigo_generacion)
    .bind(event.company_id)
    .bind(event.ambiente.code())
    .bind(event.dte_count)
    .bind(event.fecha_inicio)
    .bind(event.fecha_fin)
    .bind(event.tipo_contingencia)
    .bind(event.motivo_contingencia.as_deref())
    .bind(&event.event_unsigned)
    .bind(&event.event_signed)
    .bind(event.sello_recibido.as_deref())
    .bind(&event.hacienda_response)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<ContingencyEvent>, sqlx::Error> {
    sqlx::query_as::<_, ContingencyEvent>("SELECT * FROM dte_contingency_events WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list(
    pool: &PgPool,
    company_id: Option<Uuid>,
    limit: i64,
) -> Result<Vec<ContingencyEvent>, sqlx::Error> {
    sqlx::query_as::<_, ContingencyEvent>(
        "SELECT * FROM dte_contingency_events
         WHERE ($1::uuid IS NULL OR company_id = $1)
         ORDER BY created_at DESC, id DESC
         LIMIT $2",
    )
    .bind(company_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Accepted events with no live batch that have not yet used up their batch attempts.
pub async fn list_lacking_batch(
    pool: &PgPool,
    max_failed: i64,
) -> Result<Vec<ContingencyEvent>, sqlx::Error> {
    sqlx::query_as::<_, ContingencyEvent>(
        "SELECT e.* FROM dte_contingency_events e
         WHERE e.status = 'accepted'
           AND NOT EXISTS (SELECT 1 FROM dte_contingency_batches b
                           WHERE b.contingency_event_id = e.id AND b.status <> 'failed')
           AND (SELECT count(*) FROM dte_contingency_batches b
                WHERE b.contingency_event_id = e.id AND b.status = 'failed') < $1
           AND EXISTS (SELECT 1 FROM dte_contingency_queue q
                       WHERE q.contingency_event_id = e.id
                         AND q.status IN ('event_created', 'batch_created'))
         ORDER BY e.created_at ASC, e.id ASC",
    )
    .bind(max_failed)
    .fetch_all(pool)
    .await
}
