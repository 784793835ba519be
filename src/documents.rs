use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::models::DocumentRef;

/// The invoice/purchase records the queue stands in for. Contingency
/// resolution is the only path that marks a recovered document as final.
#[async_trait]
pub trait BusinessDocuments: Send + Sync {
    async fn mark_accepted(
        &self,
        document: DocumentRef,
        sello: &str,
        response: &Value,
    ) -> Result<bool, StoreError>;

    async fn mark_rejected(
        &self,
        document: DocumentRef,
        reason: &str,
        response: &Value,
    ) -> Result<bool, StoreError>;
}
