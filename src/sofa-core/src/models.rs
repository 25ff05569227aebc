use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Id prefix of design documents. Ids carrying it keep the slash literal in URLs.
pub const DESIGN_PREFIX: &str = "_design/";

/// Document represents a stored record: `_id`, `_rev` and arbitrary fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// A bare document carrying only its id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn is_design(&self) -> bool {
        is_design_id(&self.id)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.fields.get("_deleted"), Some(Value::Bool(true)))
    }
}

pub fn is_design_id(id: &str) -> bool {
    id.starts_with(DESIGN_PREFIX)
}

/// WriteResult is the server's answer to a single document write
///
/// A revision conflict tolerated with `conflict_ok` comes back with `ok == false`
/// and `error == "conflict"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WriteResult {
    pub fn is_conflict(&self) -> bool {
        self.error.as_deref() == Some("conflict")
    }
}

/// DbInfo represents database metadata returned by `GET /{db}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbInfo {
    pub db_name: String,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(default)]
    pub doc_del_count: u64,
    #[serde(default)]
    pub update_seq: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// ViewRow is one row of a view or `_all_docs` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    // Keys-array reads report missing keys per row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_seq: Option<Value>,
    #[serde(default)]
    pub rows: Vec<ViewRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRev {
    pub rev: String,
}

/// ChangeEntry is one record of the change feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub seq: Value,
    pub id: String,
    #[serde(default)]
    pub changes: Vec<ChangeRev>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesResult {
    #[serde(default)]
    pub results: Vec<ChangeEntry>,
    #[serde(default)]
    pub last_seq: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<u64>,
}

/// Outcome of a feed-driven update pass over the whole database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateAllSummary {
    pub ok: bool,
    pub docs_changed: u64,
    pub max_seq: Value,
}
