use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::DocumentStore;
use crate::types::{Criteria, Document, Page};

pub const AUDIT_COLLECTION: &str = "_audit";

/// Append-only audit trail kept in the `_audit` collection.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn DocumentStore>,
    /// Account that owns audit records.
    owner: String,
}

impl AuditLog {
    pub fn new(store: Arc<dyn DocumentStore>, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
        }
    }

    /// Write one audit entry. `user_id`, `context` and `message` are required.
    pub fn record(&self, user_id: &str, context: &str, message: &str) -> Result<Document> {
        if user_id.is_empty() {
            return Err(StoreError::Validation(
                "user ID must be specified for audit".to_string(),
            ));
        }
        if context.is_empty() {
            return Err(StoreError::Validation("audit context must be provided".to_string()));
        }
        if message.is_empty() {
            return Err(StoreError::Validation("audit message must be provided".to_string()));
        }

        debug!(context, "{message}");

        let Value::Object(entry) = json!({
            "user": user_id,
            "context": context,
            "message": message,
        }) else {
            unreachable!("json! object literal");
        };
        self.store
            .create(AUDIT_COLLECTION, &self.owner, kona_core::util::strip(entry))
    }

    pub fn find(&self, criteria: &Criteria, page: Page) -> Result<Vec<Document>> {
        self.store.find(AUDIT_COLLECTION, criteria, page)
    }
}
