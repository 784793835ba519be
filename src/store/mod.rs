//! Durable state of the pipeline: queue items, contingency events and batches.
//!
//! Every status change is a single guarded write keyed by row identity. A
//! write whose guard does not hold is not an error; it reports `false` (or
//! `None`) so that overlapping ticks stay idempotent.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    BatchStatus, ContingencyBatch, ContingencyEvent, NewBatch, NewContingencyEvent, NewQueueItem,
    QueueItem, QueueStatus,
};

pub use memory::MemoryStore;

#[derive(Debug, Clone)]
pub struct QueueFilter {
    pub company_id: Option<Uuid>,
    pub status: Option<QueueStatus>,
    pub limit: i64,
}

impl Default for QueueFilter {
    fn default() -> Self {
        Self {
            company_id: None,
            status: None,
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub company_id: Option<Uuid>,
    pub status: Option<BatchStatus>,
    pub limit: i64,
}

/// Final outcome of a queued document as reported by the authority.
#[derive(Debug, Clone)]
pub enum Resolution {
    Success { sello: String, response: Value },
    Rejected { reason: String, response: Value },
}

impl Resolution {
    pub fn status(&self) -> QueueStatus {
        match self {
            Resolution::Success { .. } => QueueStatus::Success,
            Resolution::Rejected { .. } => QueueStatus::Rejected,
        }
    }

    pub fn response(&self) -> &Value {
        match self {
            Resolution::Success { response, .. } | Resolution::Rejected { response, .. } => response,
        }
    }
}

/// Progress recorded by one poll of a submitted batch.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub processed: i32,
    pub rejected: i32,
    pub response: Value,
    pub complete: bool,
}

#[async_trait]
pub trait ContingencyStore: Send + Sync {
    async fn insert_queue_item(&self, item: NewQueueItem) -> Result<QueueItem, StoreError>;

    async fn find_queue_item(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError>;

    /// Newest first.
    async fn list_queue_items(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, StoreError>;

    /// Pending items under their retry budget, oldest failure first.
    async fn list_pending_by_company(
        &self,
        company_id: Uuid,
        limit: i64,
    ) -> Result<Vec<QueueItem>, StoreError>;

    async fn list_companies_with_pending(&self) -> Result<Vec<Uuid>, StoreError>;

    async fn list_items_by_event(&self, event_id: Uuid) -> Result<Vec<QueueItem>, StoreError>;

    async fn list_items_by_batch(&self, batch_id: Uuid) -> Result<Vec<QueueItem>, StoreError>;

    /// Store a signature on a pending item that has none yet.
    async fn attach_signature(&self, item_id: Uuid, signed: &str) -> Result<bool, StoreError>;

    /// `pending → event_created`.
    async fn link_to_event(&self, item_id: Uuid, event_id: Uuid) -> Result<bool, StoreError>;

    /// `event_created → batch_created`, or a re-link of a `batch_created`
    /// item whose current batch has failed.
    async fn link_to_batch(&self, item_id: Uuid, batch_id: Uuid) -> Result<bool, StoreError>;

    /// `batch_created → batch_submitted` for an item linked to `batch_id`.
    async fn mark_item_submitted(&self, item_id: Uuid, batch_id: Uuid) -> Result<bool, StoreError>;

    /// Resolve every `batch_submitted` item carrying `codigo_generacion`,
    /// optionally only within one batch. Returns the items that changed.
    async fn resolve_items(
        &self,
        codigo_generacion: &str,
        batch_id: Option<Uuid>,
        resolution: &Resolution,
    ) -> Result<Vec<QueueItem>, StoreError>;

    /// Only `pending` items are counted.
    async fn increment_retry(&self, item_id: Uuid) -> Result<bool, StoreError>;

    async fn reset_retries(&self, item_id: Uuid) -> Result<bool, StoreError>;

    async fn insert_event(
        &self,
        event: NewContingencyEvent,
    ) -> Result<ContingencyEvent, StoreError>;

    async fn find_event(&self, id: Uuid) -> Result<Option<ContingencyEvent>, StoreError>;

    async fn list_events(
        &self,
        company_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ContingencyEvent>, StoreError>;

    /// Accepted events with no live batch and fewer than `max_failed`
    /// failed batches, oldest first.
    async fn list_events_lacking_batch(
        &self,
        max_failed: i64,
    ) -> Result<Vec<ContingencyEvent>, StoreError>;

    /// `None` when the event already has a live (non-failed) batch.
    async fn insert_batch(&self, batch: NewBatch) -> Result<Option<ContingencyBatch>, StoreError>;

    async fn find_batch(&self, id: Uuid) -> Result<Option<ContingencyBatch>, StoreError>;

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<ContingencyBatch>, StoreError>;

    /// Submitted batches, oldest submission first.
    async fn list_submitted_batches(&self) -> Result<Vec<ContingencyBatch>, StoreError>;

    /// `pending → submitted`.
    async fn mark_batch_submitted(
        &self,
        batch_id: Uuid,
        codigo_lote: &str,
        response: &Value,
    ) -> Result<bool, StoreError>;

    /// `pending → failed`.
    async fn mark_batch_failed(
        &self,
        batch_id: Uuid,
        response: Option<&Value>,
    ) -> Result<bool, StoreError>;

    /// Raise counts (never lowering them) on a `submitted` batch and, when
    /// `progress.complete`, move it to `completed`.
    async fn record_batch_progress(
        &self,
        batch_id: Uuid,
        progress: &BatchProgress,
    ) -> Result<bool, StoreError>;
}
