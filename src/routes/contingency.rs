use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::auth::extractor::OperatorAuth;
use crate::contingency::EnqueueRequest;
use crate::error::AppError;
use crate::models::{BatchStatus, QueueItem, QueueStatus};
use crate::state::SharedState;
use crate::store::{BatchFilter, QueueFilter};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

#[derive(Deserialize)]
pub struct QueueParams {
    pub company_id: Option<Uuid>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct EventParams {
    pub company_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct BatchParams {
    pub company_id: Option<Uuid>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn parse_status<T: std::str::FromStr>(status: Option<&str>) -> Result<Option<T>, AppError>
where
    T::Err: std::fmt::Display,
{
    status
        .map(|s| s.parse::<T>().map_err(|e| AppError::BadRequest(e.to_string())))
        .transpose()
}

pub async fn enqueue(
    _auth: OperatorAuth,
    State(state): State<SharedState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<QueueItem>), AppError> {
    let item = state.service.enqueue(req).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn list_queue(
    _auth: OperatorAuth,
    State(state): State<SharedState>,
    Query(params): Query<QueueParams>,
) -> Result<Json<Value>, AppError> {
    let filter = QueueFilter {
        company_id: params.company_id,
        status: parse_status::<QueueStatus>(params.status.as_deref())?,
        limit: clamp_limit(params.limit),
    };
    let items = state.service.store().list_queue_items(&filter).await?;
    Ok(Json(json!({ "items": items, "count": items.len() })))
}

pub async fn get_queue_item(
    _auth: OperatorAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueItem>, AppError> {
    let item = state
        .service
        .store()
        .find_queue_item(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queue item not found".to_string()))?;
    Ok(Json(item))
}

pub async fn reset_retries(
    _auth: OperatorAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<QueueItem>, AppError> {
    let store = state.service.store();
    let item = store
        .find_queue_item(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queue item not found".to_string()))?;

    if !state.service.reset_retries(item.id).await? {
        return Err(AppError::Conflict(format!(
            "Only pending items can be reset (status: {})",
            item.status
        )));
    }

    let item = store
        .find_queue_item(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Queue item not found".to_string()))?;
    Ok(Json(item))
}

pub async fn list_events(
    _auth: OperatorAuth,
    State(state): State<SharedState>,
    Query(params): Query<EventParams>,
) -> Result<Json<Value>, AppError> {
    let events = state
        .service
        .store()
        .list_events(params.company_id, clamp_limit(params.limit))
        .await?;
    Ok(Json(json!({ "events": events, "count": events.len() })))
}

pub async fn get_event(
    _auth: OperatorAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let store = state.service.store();
    let event = store
        .find_event(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Contingency event not found".to_string()))?;
    let items = store.list_items_by_event(id).await?;
    Ok(Json(json!({ "event": event, "items": items })))
}

pub async fn get_batch(
    _auth: OperatorAuth,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let store = state.service.store();
    let batch = store
        .find_batch(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Batch not found".to_string()))?;
    let items = store.list_items_by_batch(id).await?;
    Ok(Json(json!({ "batch": batch, "items": items })))
}

pub async fn invalidate_token(
    _auth: OperatorAuth,
    State(state): State<SharedState>,
    Path(company_id): Path<Uuid>,
) -> Json<Value> {
    let invalidated = state.service.invalidate_authority_token(company_id);
    Json(json!({ "company_id": company_id, "invalidated": invalidated }))
}

pub async fn list_batches(
    _auth: OperatorAuth,
    State(state): State<SharedState>,
    Query(params): Query<BatchParams>,
) -> Result<Json<Value>, AppError> {
    let filter = BatchFilter {
        company_id: params.company_id,
        status: parse_status::<BatchStatus>(params.status.as_deref())?,
        limit: clamp_limit(params.limit),
    };
    let batches = state.service.store().list_batches(&filter).await?;
    Ok(Json(json!({ "batches": batches, "count": batches.len() })))
}
