//! The government reception service ("Hacienda") as seen by the pipeline.
//!
//! [`Authority`] is the seam the pipeline stages call; [`http::HaciendaClient`]
//! is the production implementation. Every failure crossing this boundary is an
//! [`AuthorityError`] tagged with a [`FailureKind`].

pub mod classifier;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::models::Environment;

pub use classifier::FailureKind;

/// `estado` the authority answers with when it took a submission for processing.
pub const ESTADO_RECIBIDO: &str = "RECIBIDO";

#[derive(Debug, Clone, thiserror::Error)]
#[error("[{kind}] {code}: {message}")]
pub struct AuthorityError {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
}

impl AuthorityError {
    pub fn new(kind: FailureKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, "CONNECTION_ERROR", message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Server, "SERVER_ERROR", message)
    }
}

/// Answer to a contingency event declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReceipt {
    pub estado: String,
    pub sello_recibido: Option<String>,
    pub fecha_hora: Option<String>,
    pub mensaje: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub observaciones: Vec<String>,
}

impl EventReceipt {
    pub fn is_received(&self) -> bool {
        self.estado == ESTADO_RECIBIDO
    }
}

/// Answer to a batch (lote) submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReceipt {
    pub version: Option<i32>,
    pub ambiente: Option<String>,
    pub version_app: Option<i32>,
    pub estado: String,
    pub codigo_lote: Option<String>,
    pub id_envio: Option<String>,
    pub fh_procesamiento: Option<String>,
    pub codigo_msg: Option<String>,
    pub descripcion_msg: Option<String>,
}

impl BatchReceipt {
    pub fn is_received(&self) -> bool {
        self.estado == ESTADO_RECIBIDO
    }
}

/// Per-document outcome of a submitted batch, as reported so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStatusReport {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub procesados: Vec<DocumentResult>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub rechazados: Vec<DocumentResult>,
}

impl BatchStatusReport {
    pub fn is_empty(&self) -> bool {
        self.procesados.is_empty() && self.rechazados.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResult {
    pub version: Option<i32>,
    pub ambiente: Option<String>,
    pub version_app: Option<i32>,
    #[serde(default)]
    pub estado: String,
    pub codigo_generacion: String,
    pub sello_recibido: Option<String>,
    pub fh_procesamiento: Option<String>,
    pub clasificacion_msg: Option<String>,
    pub codigo_msg: Option<String>,
    pub descripcion_msg: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub observaciones: Vec<String>,
}

impl DocumentResult {
    /// Human-readable reason for a rejected document: message plus observations.
    pub fn rejection_reason(&self) -> String {
        let mut reason = self
            .descripcion_msg
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("rejected ({})", self.estado));
        if !self.observaciones.is_empty() {
            reason.push_str(": ");
            reason.push_str(&self.observaciones.join("; "));
        }
        reason
    }
}

#[async_trait]
pub trait Authority: Send + Sync {
    /// Returns the value to send as `Authorization` on later calls.
    async fn authenticate(&self, company_id: Uuid) -> Result<String, AuthorityError>;

    /// Forget the cached session of a company so the next call logs in again.
    /// Returns whether there was one.
    fn invalidate_token(&self, company_id: Uuid) -> bool;

    async fn submit_contingency_event(
        &self,
        token: &str,
        nit: &str,
        signed_event: &str,
    ) -> Result<EventReceipt, AuthorityError>;

    async fn submit_batch(
        &self,
        token: &str,
        ambiente: Environment,
        nit: &str,
        documents: &[String],
    ) -> Result<BatchReceipt, AuthorityError>;

    async fn query_batch_status(
        &self,
        token: &str,
        codigo_lote: &str,
    ) -> Result<BatchStatusReport, AuthorityError>;
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_report_tolerates_null_lists() {
        let report: BatchStatusReport =
            serde_json::from_value(json!({ "procesados": null, "rechazados": [] })).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn rejection_reason_includes_observations() {
        let result: DocumentResult = serde_json::from_value(json!({
            "estado": "RECHAZADO",
            "codigoGeneracion": "A1B2",
            "descripcionMsg": "invalid NIT",
            "observaciones": ["[emisor.nit] no existe"]
        }))
        .unwrap();
        assert_eq!(result.rejection_reason(), "invalid NIT: [emisor.nit] no existe");
    }
}
