use crate::error::Result;
use crate::types::{Criteria, Document, Page, Record, UpdateCounts};

/// Collection-oriented document store.
///
/// Synchronous like the other SQLite-backed managers; implementations must
/// be shareable across tasks (`Arc<dyn DocumentStore>`). Writes that filter
/// and then modify (`update_all`, `remove_all`) are atomic with respect to
/// other writers of the same store.
pub trait DocumentStore: Send + Sync {
    /// Insert `data` into `collection`, assigning a fresh id.
    fn create(&self, collection: &str, owner: &str, data: Record) -> Result<Document>;

    /// Fetch one live document by id. `NotFound` if absent or removed.
    fn get(&self, collection: &str, id: &str) -> Result<Document>;

    /// All live documents matching `criteria`, oldest first, windowed by `page`.
    fn find(&self, collection: &str, criteria: &Criteria, page: Page) -> Result<Vec<Document>>;

    /// First live document matching `criteria`. `NotFound` when none does.
    fn find_one(&self, collection: &str, criteria: &Criteria) -> Result<Document> {
        self.find(collection, criteria, Page { skip: 0, limit: Some(1) })?
            .into_iter()
            .next()
            .ok_or_else(|| crate::error::StoreError::not_found(collection))
    }

    /// Merge `patch` into exactly one document. `NotFound` if the id does
    /// not resolve. `null` values clear the field.
    fn update(&self, collection: &str, id: &str, patch: Record) -> Result<String>;

    /// Merge `patch` into every document matching `criteria`.
    fn update_all(&self, collection: &str, criteria: &Criteria, patch: Record) -> Result<UpdateCounts>;

    /// Soft-delete one document. `NotFound` if absent.
    fn remove(&self, collection: &str, id: &str) -> Result<String>;

    /// Soft-delete every document matching `criteria`.
    fn remove_all(&self, collection: &str, criteria: &Criteria) -> Result<UpdateCounts>;
}
