use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Environment, ParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Accepted,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Accepted => "accepted",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(EventStatus::Accepted),
            "failed" => Ok(EventStatus::Failed),
            other => Err(ParseError::new("event status", other)),
        }
    }
}

impl TryFrom<String> for EventStatus {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A contingency declaration accepted by the authority. Never updated after insert.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ContingencyEvent {
    pub id: Uuid,
    pub codigo_generacion: String,
    pub company_id: Uuid,
    #[sqlx(try_from = "String")]
    pub ambiente: Environment,
    #[sqlx(try_from = "String")]
    pub status: EventStatus,
    pub dte_count: i32,
    pub fecha_inicio: DateTime<Utc>,
    pub fecha_fin: DateTime<Utc>,
    pub tipo_contingencia: i32,
    pub motivo_contingencia: Option<String>,
    pub event_unsigned: serde_json::Value,
    #[serde(skip_serializing)]
    pub event_signed: String,
    pub sello_recibido: Option<String>,
    pub hacienda_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewContingencyEvent {
    pub codigo_generacion: String,
    pub company_id: Uuid,
    pub ambiente: Environment,
    pub dte_count: i32,
    pub fecha_inicio: DateTime<Utc>,
    pub fecha_fin: DateTime<Utc>,
    pub tipo_contingencia: i32,
    pub motivo_contingencia: Option<String>,
    pub event_unsigned: serde_json::Value,
    pub event_signed: String,
    pub sello_recibido: Option<String>,
    pub hacienda_response: serde_json::Value,
}
