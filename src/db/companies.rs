use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::company::{CompanyDirectory, CompanyError, CredentialStore};
use crate::crypto;
use crate::models::{CompanyProfile, Credentials};

pub async fn find_active(pool: &PgPool, id: Uuid) -> Result<Option<CompanyProfile>, sqlx::Error> {
    sqlx::query_as::<_, CompanyProfile>(
        "SELECT id, nit, legal_name, commercial_name, legal_representative_name,
                legal_representative_doc_type, legal_representative_doc_number,
                establishment_type, establishment_code_mh, point_of_sale_code, phone, email
         FROM companies WHERE id = $1 AND active",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

#[derive(sqlx::FromRow)]
struct EncryptedCredentials {
    nit: String,
    signer_password_enc: Vec<u8>,
    authority_password_enc: Vec<u8>,
}

async fn find_encrypted_credentials(
    pool: &PgPool,
    company_id: Uuid,
) -> Result<Option<EncryptedCredentials>, sqlx::Error> {
    sqlx::query_as::<_, EncryptedCredentials>(
        "SELECT c.nit, cc.signer_password_enc, cc.authority_password_enc
         FROM company_credentials cc
         JOIN companies c ON c.id = cc.company_id
         WHERE cc.company_id = $1",
    )
    .bind(company_id)
    .fetch_optional(pool)
    .await
}

/// Store both secrets encrypted under `encryption_key`.
pub async fn upsert_credentials(
    pool: &PgPool,
    company_id: Uuid,
    signer_password: &str,
    authority_password: &str,
    encryption_key: &str,
) -> Result<(), CompanyError> {
    let signer_enc = crypto::encrypt(signer_password, encryption_key)?;
    let authority_enc = crypto::encrypt(authority_password, encryption_key)?;
    sqlx::query(
        "INSERT INTO company_credentials (company_id, signer_password_enc, authority_password_enc)
         VALUES ($1, $2, $3)
         ON CONFLICT (company_id) DO UPDATE SET
           signer_password_enc = EXCLUDED.signer_password_enc,
           authority_password_enc = EXCLUDED.authority_password_enc,
           updated_at = now()",
    )
    .bind(company_id)
    .bind(signer_enc)
    .bind(authority_enc)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgCompanyDirectory {
    pool: PgPool,
}

impl PgCompanyDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CompanyDirectory for PgCompanyDirectory {
    async fn company_profile(&self, company_id: Uuid) -> Result<CompanyProfile, CompanyError> {
        find_active(&self.pool, company_id)
            .await?
            .ok_or(CompanyError::NotFound(company_id))
    }
}

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
    encryption_key: String,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool, encryption_key: String) -> Self {
        Self {
            pool,
            encryption_key,
        }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn load_credentials(&self, company_id: Uuid) -> Result<Credentials, CompanyError> {
        let row = find_encrypted_credentials(&self.pool, company_id)
            .await?
            .ok_or(CompanyError::NotConfigured(company_id))?;

        Ok(Credentials {
            nit: row.nit,
            signer_password: crypto::decrypt(&row.signer_password_enc, &self.encryption_key)?,
            authority_password: crypto::decrypt(&row.authority_password_enc, &self.encryption_key)?,
        })
    }
}
