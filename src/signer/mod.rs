pub mod http;

use async_trait::async_trait;

use crate::authority::FailureKind;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SignerError {
    #[error("signer unavailable: {0}")]
    Unavailable(String),
    #[error("signer refused document: {code} - {message}")]
    Rejected { code: String, message: String },
}

impl SignerError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SignerError::Unavailable(_) => FailureKind::Network,
            SignerError::Rejected { .. } => FailureKind::Validation,
        }
    }
}

/// Produces the compact JWS the authority expects for a DTE or event payload.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(
        &self,
        nit: &str,
        password: &str,
        payload: &serde_json::Value,
    ) -> Result<String, SignerError>;
}
