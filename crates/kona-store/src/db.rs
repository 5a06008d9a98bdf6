use rusqlite::Connection;

use crate::error::Result;

/// Initialise the document table and its lookup index.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            id          TEXT    NOT NULL PRIMARY KEY,
            collection  TEXT    NOT NULL,
            owner       TEXT    NOT NULL,
            data        TEXT    NOT NULL,   -- JSON object
            created_at  INTEGER NOT NULL,   -- epoch millis
            updated_at  INTEGER NOT NULL,
            deleted     INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_documents_collection
            ON documents(collection, deleted, created_at);
        CREATE INDEX IF NOT EXISTS idx_documents_status
            ON documents(collection, json_extract(data, '$.status'))
            WHERE deleted = 0;",
    )?;
    Ok(())
}
