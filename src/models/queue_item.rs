use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use super::{Environment, ParseError};

/// Lifecycle of a queued document. Only ever moves forward:
/// `pending → event_created → batch_created → batch_submitted → {success | rejected}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    EventCreated,
    BatchCreated,
    BatchSubmitted,
    Success,
    Rejected,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::EventCreated => "event_created",
            QueueStatus::BatchCreated => "batch_created",
            QueueStatus::BatchSubmitted => "batch_submitted",
            QueueStatus::Success => "success",
            QueueStatus::Rejected => "rejected",
        }
    }

    /// Whether `next` is exactly one forward step from `self`.
    pub fn can_advance_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::EventCreated)
                | (QueueStatus::EventCreated, QueueStatus::BatchCreated)
                | (QueueStatus::BatchCreated, QueueStatus::BatchSubmitted)
                | (QueueStatus::BatchSubmitted, QueueStatus::Success)
                | (QueueStatus::BatchSubmitted, QueueStatus::Rejected)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "event_created" => Ok(QueueStatus::EventCreated),
            "batch_created" => Ok(QueueStatus::BatchCreated),
            "batch_submitted" => Ok(QueueStatus::BatchSubmitted),
            "success" => Ok(QueueStatus::Success),
            "rejected" => Ok(QueueStatus::Rejected),
            other => Err(ParseError::new("queue status", other)),
        }
    }
}

/// The business document a queue item stands for. Exactly one kind is ever set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DocumentRef {
    Invoice(Uuid),
    Purchase(Uuid),
}

impl DocumentRef {
    pub fn id(&self) -> Uuid {
        match self {
            DocumentRef::Invoice(id) | DocumentRef::Purchase(id) => *id,
        }
    }

    pub fn invoice_id(&self) -> Option<Uuid> {
        match self {
            DocumentRef::Invoice(id) => Some(*id),
            DocumentRef::Purchase(_) => None,
        }
    }

    pub fn purchase_id(&self) -> Option<Uuid> {
        match self {
            DocumentRef::Purchase(id) => Some(*id),
            DocumentRef::Invoice(_) => None,
        }
    }

    /// Rebuild from the two nullable storage columns. `None` unless exactly one is set.
    pub fn from_columns(invoice_id: Option<Uuid>, purchase_id: Option<Uuid>) -> Option<Self> {
        match (invoice_id, purchase_id) {
            (Some(id), None) => Some(DocumentRef::Invoice(id)),
            (None, Some(id)) => Some(DocumentRef::Purchase(id)),
            _ => None,
        }
    }
}

/// Where the normal submission path gave up on a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FailureStage {
    Signing,
    AuthorityAuth,
    AuthoritySubmission,
    Other(String),
}

impl FailureStage {
    pub fn as_str(&self) -> &str {
        match self {
            FailureStage::Signing => "firmador_failed",
            FailureStage::AuthorityAuth => "hacienda_auth_failed",
            FailureStage::AuthoritySubmission => "hacienda_timeout",
            FailureStage::Other(stage) => stage,
        }
    }

    pub fn is_authority_side(&self) -> bool {
        matches!(
            self,
            FailureStage::AuthorityAuth | FailureStage::AuthoritySubmission
        )
    }
}

impl From<&str> for FailureStage {
    fn from(s: &str) -> Self {
        match s {
            "firmador_failed" | "signing" | "signing-failed" => FailureStage::Signing,
            "hacienda_auth_failed" | "authentication" | "authority-auth-failed" => {
                FailureStage::AuthorityAuth
            }
            "hacienda_timeout" | "submission" | "authority-timeout" => {
                FailureStage::AuthoritySubmission
            }
            other => FailureStage::Other(other.to_string()),
        }
    }
}

impl From<String> for FailureStage {
    fn from(s: String) -> Self {
        FailureStage::from(s.as_str())
    }
}

impl From<FailureStage> for String {
    fn from(stage: FailureStage) -> Self {
        stage.as_str().to_string()
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document awaiting or undergoing contingency handling.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub document: DocumentRef,
    pub tipo_dte: String,
    pub codigo_generacion: String,
    pub ambiente: Environment,
    pub failure_stage: FailureStage,
    pub failure_reason: String,
    pub failure_timestamp: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub dte_unsigned: Vec<u8>,
    #[serde(skip_serializing)]
    pub dte_signed: Option<String>,
    pub contingency_event_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub status: QueueStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub sello_recibido: Option<String>,
    pub rejection_reason: Option<String>,
    pub hacienda_response: Option<serde_json::Value>,
    pub company_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Pending and still under its retry budget.
    pub fn is_retry_eligible(&self) -> bool {
        self.status == QueueStatus::Pending && self.retry_count < self.max_retries
    }

    pub fn signed_payload(&self) -> Option<&str> {
        self.dte_signed.as_deref().filter(|s| !s.is_empty())
    }
}

impl<'r> FromRow<'r, PgRow> for QueueItem {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let invoice_id: Option<Uuid> = row.try_get("invoice_id")?;
        let purchase_id: Option<Uuid> = row.try_get("purchase_id")?;
        let document = DocumentRef::from_columns(invoice_id, purchase_id).ok_or_else(|| {
            sqlx::Error::ColumnDecode {
                index: "invoice_id".to_string(),
                source: "exactly one of invoice_id/purchase_id must be set".into(),
            }
        })?;

        let ambiente: String = row.try_get("ambiente")?;
        let status: String = row.try_get("status")?;
        let failure_stage: String = row.try_get("failure_stage")?;

        Ok(QueueItem {
            id: row.try_get("id")?,
            document,
            tipo_dte: row.try_get("tipo_dte")?,
            codigo_generacion: row.try_get("codigo_generacion")?,
            ambiente: ambiente.parse().map_err(|e: ParseError| sqlx::Error::ColumnDecode {
                index: "ambiente".to_string(),
                source: Box::new(e),
            })?,
            failure_stage: FailureStage::from(failure_stage),
            failure_reason: row.try_get("failure_reason")?,
            failure_timestamp: row.try_get("failure_timestamp")?,
            dte_unsigned: row.try_get("dte_unsigned")?,
            dte_signed: row.try_get("dte_signed")?,
            contingency_event_id: row.try_get("contingency_event_id")?,
            batch_id: row.try_get("batch_id")?,
            status: status.parse().map_err(|e: ParseError| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: Box::new(e),
            })?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            sello_recibido: row.try_get("sello_recibido")?,
            rejection_reason: row.try_get("rejection_reason")?,
            hacienda_response: row.try_get("hacienda_response")?,
            company_id: row.try_get("company_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// Insert parameters for a queue item; status starts at `pending` with zero retries.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub document: DocumentRef,
    pub tipo_dte: String,
    pub codigo_generacion: String,
    pub ambiente: Environment,
    pub failure_stage: FailureStage,
    pub failure_reason: String,
    pub failure_timestamp: DateTime<Utc>,
    pub dte_unsigned: Vec<u8>,
    pub dte_signed: Option<String>,
    pub max_retries: i32,
    pub company_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_one_step_forward() {
        use QueueStatus::*;

        let chain = [Pending, EventCreated, BatchCreated, BatchSubmitted];
        for pair in chain.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]));
            assert!(!pair[1].can_advance_to(pair[0]));
        }

        assert!(BatchSubmitted.can_advance_to(Success));
        assert!(BatchSubmitted.can_advance_to(Rejected));
        assert!(!Pending.can_advance_to(BatchCreated));
        assert!(!EventCreated.can_advance_to(Success));
        assert!(!Success.can_advance_to(Rejected));
        assert!(!Rejected.can_advance_to(Pending));
    }

    #[test]
    fn document_ref_requires_exactly_one_column() {
        let id = Uuid::now_v7();
        assert_eq!(
            DocumentRef::from_columns(Some(id), None),
            Some(DocumentRef::Invoice(id))
        );
        assert_eq!(
            DocumentRef::from_columns(None, Some(id)),
            Some(DocumentRef::Purchase(id))
        );
        assert_eq!(DocumentRef::from_columns(Some(id), Some(id)), None);
        assert_eq!(DocumentRef::from_columns(None, None), None);
    }

    #[test]
    fn document_ref_json_shape() {
        let id = Uuid::nil();
        let json = serde_json::to_value(DocumentRef::Purchase(id)).unwrap();
        assert_eq!(json["kind"], "purchase");
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn failure_stage_aliases() {
        assert_eq!(FailureStage::from("signing"), FailureStage::Signing);
        assert_eq!(FailureStage::from("firmador_failed"), FailureStage::Signing);
        assert_eq!(
            FailureStage::from("authority-timeout"),
            FailureStage::AuthoritySubmission
        );
        assert_eq!(
            FailureStage::from("disk_full").as_str(),
            "disk_full"
        );
        assert!(FailureStage::AuthorityAuth.is_authority_side());
        assert!(!FailureStage::Signing.is_authority_side());
    }
}
