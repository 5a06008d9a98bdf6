pub mod audit;
pub mod db;
pub mod error;
pub mod sqlite;
pub mod store;
pub mod types;

pub use audit::AuditLog;
pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use store::DocumentStore;
pub use types::{Criteria, Document, Page, Record, UpdateCounts};
