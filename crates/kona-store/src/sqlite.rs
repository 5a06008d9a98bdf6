use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::store::DocumentStore;
use crate::types::{Criteria, Document, Page, Record, UpdateCounts, ID_FIELD};

const SELECT_COLUMNS: &str = "id, owner, data, created_at, updated_at";

/// SQLite-backed [`DocumentStore`].
///
/// Wraps a single connection in a `Mutex`. Every filter-then-write runs in an
/// `IMMEDIATE` transaction, so a compare-and-swap through [`update_all`]
/// stays atomic even when several processes share the database file.
///
/// [`update_all`]: DocumentStore::update_all
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Private in-memory database, used by tests and ephemeral setups.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }
}

impl DocumentStore for SqliteStore {
    #[instrument(skip(self, data))]
    fn create(&self, collection: &str, owner: &str, data: Record) -> Result<Document> {
        if collection.is_empty() || owner.is_empty() {
            return Err(StoreError::Validation(
                "collection and owner must be specified".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = now_millis();
        let body = serde_json::to_string(&data)?;

        let db = self.db.lock().expect("document store lock poisoned");
        db.execute(
            "INSERT INTO documents (id, collection, owner, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![id, collection, owner, body, now],
        )?;
        debug!(%id, "document created");

        Ok(Document {
            id,
            owner: owner.to_string(),
            created_at: now,
            updated_at: now,
            data,
        })
    }

    #[instrument(skip(self))]
    fn get(&self, collection: &str, id: &str) -> Result<Document> {
        let db = self.db.lock().expect("document store lock poisoned");
        load_one(&db, collection, id)?.ok_or_else(|| StoreError::not_found(collection))
    }

    #[instrument(skip(self))]
    fn find(&self, collection: &str, criteria: &Criteria, page: Page) -> Result<Vec<Document>> {
        let db = self.db.lock().expect("document store lock poisoned");
        let matching = load_matching(&db, collection, criteria)?;
        let window = matching.into_iter().skip(page.skip);
        Ok(match page.limit {
            Some(limit) => window.take(limit).collect(),
            None => window.collect(),
        })
    }

    #[instrument(skip(self, patch))]
    fn update(&self, collection: &str, id: &str, patch: Record) -> Result<String> {
        let mut db = self.db.lock().expect("document store lock poisoned");
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut doc = load_one(&tx, collection, id)?.ok_or_else(|| StoreError::not_found(collection))?;
        merge(&mut doc.data, &patch);
        write_data(&tx, &doc.id, &doc.data)?;
        tx.commit()?;

        Ok(doc.id)
    }

    #[instrument(skip(self, patch))]
    fn update_all(&self, collection: &str, criteria: &Criteria, patch: Record) -> Result<UpdateCounts> {
        let mut db = self.db.lock().expect("document store lock poisoned");
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut counts = UpdateCounts::default();
        for mut doc in load_matching(&tx, collection, criteria)? {
            counts.found += 1;
            let before = doc.data.clone();
            merge(&mut doc.data, &patch);
            if doc.data != before {
                write_data(&tx, &doc.id, &doc.data)?;
                counts.modified += 1;
            }
        }
        tx.commit()?;

        debug!(found = counts.found, modified = counts.modified, "criteria update");
        Ok(counts)
    }

    #[instrument(skip(self))]
    fn remove(&self, collection: &str, id: &str) -> Result<String> {
        let db = self.db.lock().expect("document store lock poisoned");
        let n = db.execute(
            "UPDATE documents SET deleted = 1, updated_at = ?1
             WHERE id = ?2 AND collection = ?3 AND deleted = 0",
            rusqlite::params![now_millis(), id, collection],
        )?;
        if n == 0 {
            return Err(StoreError::not_found(collection));
        }
        Ok(id.to_string())
    }

    #[instrument(skip(self))]
    fn remove_all(&self, collection: &str, criteria: &Criteria) -> Result<UpdateCounts> {
        let mut db = self.db.lock().expect("document store lock poisoned");
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let matching = load_matching(&tx, collection, criteria)?;
        let now = now_millis();
        for doc in &matching {
            tx.execute(
                "UPDATE documents SET deleted = 1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, doc.id],
            )?;
        }
        tx.commit()?;

        Ok(UpdateCounts {
            found: matching.len(),
            modified: matching.len(),
        })
    }
}

/// Apply a patch: `null` clears a field, anything else overwrites it.
fn merge(data: &mut Record, patch: &Record) {
    for (field, value) in patch {
        if value.is_null() {
            data.remove(field);
        } else {
            data.insert(field.clone(), value.clone());
        }
    }
}

fn write_data(conn: &Connection, id: &str, data: &Record) -> Result<()> {
    conn.execute(
        "UPDATE documents SET data = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![serde_json::to_string(data)?, now_millis(), id],
    )?;
    Ok(())
}

fn load_one(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM documents
                 WHERE id = ?1 AND collection = ?2 AND deleted = 0"
            ),
            rusqlite::params![id, collection],
            row_to_raw,
        )
        .optional()?;
    raw.map(into_document).transpose()
}

fn load_matching(conn: &Connection, collection: &str, criteria: &Criteria) -> Result<Vec<Document>> {
    // Narrow by primary key when the criteria pins one.
    if let Some(id) = criteria.get(ID_FIELD).and_then(|v| v.as_str()) {
        return Ok(load_one(conn, collection, id)?
            .into_iter()
            .filter(|doc| criteria.matches(&doc.id, &doc.data))
            .collect());
    }

    let mut sql = format!(
        "SELECT {SELECT_COLUMNS} FROM documents
         WHERE collection = ?1 AND deleted = 0"
    );
    let mut args = vec![collection.to_string()];
    // String equality is filtered by SQLite; everything else by `matches` below.
    for (field, value) in criteria.iter() {
        let Some(text) = value.as_str() else { continue };
        if !is_plain_field(field) {
            continue;
        }
        args.push(text.to_string());
        sql.push_str(&format!(" AND json_extract(data, '$.{field}') = ?{}", args.len()));
    }
    sql.push_str(" ORDER BY created_at, rowid");

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_raw)?;

    let mut out = Vec::new();
    for raw in rows {
        let doc = into_document(raw?)?;
        if criteria.matches(&doc.id, &doc.data) {
            out.push(doc);
        }
    }
    Ok(out)
}

/// Field names safe to splice into a JSON path literal.
fn is_plain_field(field: &str) -> bool {
    field != ID_FIELD
        && !field.is_empty()
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

type RawRow = (String, String, String, i64, i64);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?, // id
        row.get(1)?, // owner
        row.get(2)?, // data JSON
        row.get(3)?, // created_at
        row.get(4)?, // updated_at
    ))
}

fn into_document((id, owner, data, created_at, updated_at): RawRow) -> Result<Document> {
    Ok(Document {
        id,
        owner,
        created_at,
        updated_at,
        data: serde_json::from_str(&data)?,
    })
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("in-memory store")
    }

    #[test]
    fn create_then_get() {
        let s = store();
        let doc = s
            .create("_jobs", "system", record(json!({"name": "a"})))
            .unwrap();
        let fetched = s.get("_jobs", &doc.id).unwrap();
        assert_eq!(fetched.data["name"], "a");
        assert_eq!(fetched.owner, "system");
    }

    #[test]
    fn get_from_other_collection_is_not_found() {
        let s = store();
        let doc = s.create("_jobs", "system", Record::new()).unwrap();
        assert!(s.get("_audit", &doc.id).unwrap_err().is_not_found());
    }

    #[test]
    fn update_by_id_merges_and_clears_nulls() {
        let s = store();
        let doc = s
            .create("_jobs", "system", record(json!({"status": "claimed", "claim": "c1"})))
            .unwrap();
        s.update("_jobs", &doc.id, record(json!({"status": "ready", "claim": null})))
            .unwrap();
        let after = s.get("_jobs", &doc.id).unwrap();
        assert_eq!(after.data["status"], "ready");
        assert!(!after.data.contains_key("claim"));
    }

    #[test]
    fn update_missing_id_is_not_found() {
        let s = store();
        let err = s.update("_jobs", "nope", Record::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn compare_and_swap_only_hits_matching_records() {
        let s = store();
        let doc = s
            .create("_jobs", "system", record(json!({"status": "ready"})))
            .unwrap();
        let cas = Criteria::by_id(&doc.id).eq("status", "ready");

        let first = s
            .update_all("_jobs", &cas, record(json!({"status": "claimed", "claim": "a"})))
            .unwrap();
        assert_eq!(first, UpdateCounts { found: 1, modified: 1 });

        let second = s
            .update_all("_jobs", &cas, record(json!({"status": "claimed", "claim": "b"})))
            .unwrap();
        assert_eq!(second, UpdateCounts { found: 0, modified: 0 });
        assert_eq!(s.get("_jobs", &doc.id).unwrap().data["claim"], "a");
    }

    #[test]
    fn find_filters_orders_and_pages() {
        let s = store();
        for (i, status) in ["ready", "waiting", "ready", "ready"].iter().enumerate() {
            s.create("_jobs", "system", record(json!({"n": i, "status": status})))
                .unwrap();
        }
        let ready = Criteria::new().eq("status", "ready");
        let all = s.find("_jobs", &ready, Page::all()).unwrap();
        let ns: Vec<i64> = all.iter().map(|d| d.data["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 2, 3]);

        let paged = s.find("_jobs", &ready, Page::new(Some(1), Some(1))).unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].data["n"], 2);
    }

    #[test]
    fn string_criteria_keep_json_types_apart() {
        let s = store();
        s.create("_jobs", "system", record(json!({"n": "5", "status": "ready"})))
            .unwrap();
        s.create("_jobs", "system", record(json!({"n": 5, "status": "ready"})))
            .unwrap();
        s.create("_jobs", "system", record(json!({"status": "done"})))
            .unwrap();

        let text = s
            .find("_jobs", &Criteria::new().eq("n", "5"), Page::all())
            .unwrap();
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].data["n"], "5");

        let number = s
            .find("_jobs", &Criteria::new().eq("n", 5).eq("status", "ready"), Page::all())
            .unwrap();
        assert_eq!(number.len(), 1);
        assert_eq!(number[0].data["n"], 5);

        let odd_key = s
            .find("_jobs", &Criteria::new().eq("a.b", "x"), Page::all())
            .unwrap();
        assert!(odd_key.is_empty());
        assert!(is_plain_field("status"));
        assert!(!is_plain_field("a.b"));
        assert!(!is_plain_field(ID_FIELD));
    }

    #[test]
    fn removed_documents_disappear() {
        let s = store();
        let doc = s.create("_jobs", "system", Record::new()).unwrap();
        s.remove("_jobs", &doc.id).unwrap();
        assert!(s.get("_jobs", &doc.id).unwrap_err().is_not_found());
        assert!(s.remove("_jobs", &doc.id).unwrap_err().is_not_found());
        assert!(s
            .find("_jobs", &Criteria::new(), Page::all())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn find_one_reports_not_found() {
        let s = store();
        let err = s
            .find_one("_jobs", &Criteria::new().eq("code", "x"))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
