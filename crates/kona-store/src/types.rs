use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A schemaless document body.
pub type Record = Map<String, Value>;

/// Reserved criteria key matching the document id.
pub const ID_FIELD: &str = "_id";

/// A stored document plus the store's audit fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner: String,
    /// Epoch millis.
    pub created_at: i64,
    /// Epoch millis.
    pub updated_at: i64,
    pub data: Record,
}

impl Document {
    /// Flatten into a single record: the body plus `_id`, `_owner`,
    /// `_created` and `_updated`. Typed views deserialize from this shape.
    pub fn into_record(self) -> Record {
        let mut record = self.data;
        record.insert(ID_FIELD.to_string(), Value::String(self.id));
        record.insert("_owner".to_string(), Value::String(self.owner));
        record.insert("_created".to_string(), Value::from(self.created_at));
        record.insert("_updated".to_string(), Value::from(self.updated_at));
        record
    }
}

/// Field-equality filter over document bodies.
///
/// All entries must match. `_id` compares against the document id, any
/// other key against the top-level body field of that name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Criteria(Record);

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().id(id)
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.eq(ID_FIELD, id.into())
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn matches(&self, id: &str, data: &Record) -> bool {
        self.0.iter().all(|(field, expected)| {
            if field == ID_FIELD {
                return expected.as_str() == Some(id);
            }
            match data.get(field) {
                Some(actual) => actual == expected,
                // An absent field matches an explicit null.
                None => expected.is_null(),
            }
        })
    }
}

impl From<Record> for Criteria {
    fn from(record: Record) -> Self {
        Self(record)
    }
}

/// Offset/limit window applied after filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(skip: Option<usize>, limit: Option<usize>) -> Self {
        Self {
            skip: skip.unwrap_or(0),
            limit,
        }
    }
}

/// Outcome of a criteria-based write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCounts {
    /// Records matching the criteria.
    pub found: usize,
    /// Records actually written.
    pub modified: usize,
}
