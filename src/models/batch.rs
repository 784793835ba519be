use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Environment, ParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Submitted,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Submitted => "submitted",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "submitted" => Ok(BatchStatus::Submitted),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(ParseError::new("batch status", other)),
        }
    }
}

impl TryFrom<String> for BatchStatus {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One lote: the signed documents of a single event submitted together.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ContingencyBatch {
    pub id: Uuid,
    pub contingency_event_id: Uuid,
    pub codigo_lote: Option<String>,
    pub company_id: Uuid,
    #[sqlx(try_from = "String")]
    pub ambiente: Environment,
    #[sqlx(try_from = "String")]
    pub status: BatchStatus,
    pub total_dtes: i32,
    pub processed_count: i32,
    pub rejected_count: i32,
    pub hacienda_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ContingencyBatch {
    pub fn resolved_count(&self) -> i32 {
        self.processed_count + self.rejected_count
    }
}

#[derive(Debug, Clone)]
pub struct NewBatch {
    pub contingency_event_id: Uuid,
    pub company_id: Uuid,
    pub ambiente: Environment,
    pub total_dtes: i32,
}
