//! Issuer-side collaborators: who a company is, and the secrets it signs and
//! authenticates with. Postgres implementations live in [`crate::db::companies`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::authority::FailureKind;
use crate::crypto::CryptoError;
use crate::models::{CompanyProfile, Credentials};

#[derive(Debug, thiserror::Error)]
pub enum CompanyError {
    #[error("company {0} not found or inactive")]
    NotFound(Uuid),
    #[error("credentials not configured for company {0}")]
    NotConfigured(Uuid),
    #[error("failed to decrypt credentials: {0}")]
    Decrypt(#[from] CryptoError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CompanyError {
    /// Missing setup needs an operator; a database hiccup is worth another try.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CompanyError::Database(_) => FailureKind::Unknown,
            _ => FailureKind::Validation,
        }
    }
}

#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    async fn company_profile(&self, company_id: Uuid) -> Result<CompanyProfile, CompanyError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load_credentials(&self, company_id: Uuid) -> Result<Credentials, CompanyError>;
}
