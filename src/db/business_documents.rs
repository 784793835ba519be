use async_trait::async_trait;
use serde_json::{Value, json};
use sqlx::PgPool;

use crate::documents::BusinessDocuments;
use crate::error::StoreError;
use crate::models::DocumentRef;

pub const DTE_STATUS_PROCESSED: &str = "PROCESADO";
pub const DTE_STATUS_REJECTED: &str = "RECHAZADO";

fn table(document: DocumentRef) -> &'static str {
    match document {
        DocumentRef::Invoice(_) => "invoices",
        DocumentRef::Purchase(_) => "purchases",
    }
}

pub async fn mark_accepted(
    pool: &PgPool,
    document: DocumentRef,
    sello: &str,
    response: &Value,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET dte_status = $2, dte_sello_recibido = $3,
                dte_hacienda_response = $4, dte_submitted_at = now()
         WHERE id = $1",
        table(document)
    );
    let result = sqlx::query(&sql)
        .bind(document.id())
        .bind(DTE_STATUS_PROCESSED)
        .bind(sello)
        .bind(response)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_rejected(
    pool: &PgPool,
    document: DocumentRef,
    reason: &str,
    response: &Value,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET dte_status = $2, dte_hacienda_response = $3
         WHERE id = $1",
        table(document)
    );
    let result = sqlx::query(&sql)
        .bind(document.id())
        .bind(DTE_STATUS_REJECTED)
        .bind(json!({ "reason": reason, "response": response }))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

#[derive(Clone)]
pub struct PgBusinessDocuments {
    pool: PgPool,
}

impl PgBusinessDocuments {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BusinessDocuments for PgBusinessDocuments {
    async fn mark_accepted(
        &self,
        document: DocumentRef,
        sello: &str,
        response: &Value,
    ) -> Result<bool, StoreError> {
        Ok(mark_accepted(&self.pool, document, sello, response).await?)
    }

    async fn mark_rejected(
        &self,
        document: DocumentRef,
        reason: &str,
        response: &Value,
    ) -> Result<bool, StoreError> {
        Ok(mark_rejected(&self.pool, document, reason, response).await?)
    }
}
