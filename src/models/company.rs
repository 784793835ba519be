use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issuer identity fields declared in a contingency event's `emisor` block.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub id: Uuid,
    pub nit: String,
    pub legal_name: String,
    pub commercial_name: Option<String>,
    pub legal_representative_name: String,
    pub legal_representative_doc_type: String,
    pub legal_representative_doc_number: String,
    pub establishment_type: String,
    pub establishment_code_mh: Option<String>,
    pub point_of_sale_code: Option<String>,
    pub phone: String,
    pub email: String,
}

/// Decrypted per-company secrets for the signer and the authority.
#[derive(Clone)]
pub struct Credentials {
    pub nit: String,
    pub signer_password: String,
    pub authority_password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("nit", &self.nit)
            .field("signer_password", &"<redacted>")
            .field("authority_password", &"<redacted>")
            .finish()
    }
}
