//! Query parameter allow-lists for view and change-feed reads.
//!
//! Callers hand over an open map of options. Only the keys recognized for the
//! operation kind survive encoding; each surviving value is JSON-encoded so
//! that `startkey: "a"` travels as `startkey="a"` and `key: {"a":1}` as
//! `key={"a":1}`. Pair order follows the allow-list, not the caller's map.

use serde_json::{Map, Value};

/// Parameters recognized on `_view` and `_all_docs` reads
pub const VIEW_QUERY_KEYS: &[&str] = &[
    "descending",
    "endkey",
    "endkey_docid",
    "group",
    "group_level",
    "include_docs",
    "inclusive_end",
    "key",
    "limit",
    "reduce",
    "skip",
    "stale",
    "startkey",
    "startkey_docid",
    "update_seq",
];

/// Parameters recognized on `_changes` reads
pub const CHANGES_QUERY_KEYS: &[&str] = &["filter", "include_docs", "limit", "since", "timeout"];

/// Boolean option selecting the long-poll feed on `_changes`
pub const LONGPOLL_KEY: &str = "longpoll";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    View,
    Changes,
}

impl QueryKind {
    pub fn allowed_keys(self) -> &'static [&'static str] {
        match self {
            QueryKind::View => VIEW_QUERY_KEYS,
            QueryKind::Changes => CHANGES_QUERY_KEYS,
        }
    }
}

/// QueryParams is the caller-supplied option map for a view or changes read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(Map<String, Value>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, builder style
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_longpoll(&self) -> bool {
        matches!(self.0.get(LONGPOLL_KEY), Some(Value::Bool(true)))
    }

    /// Filter to the allow-list for `kind` and JSON-encode each value.
    ///
    /// For `QueryKind::Changes` a `longpoll: true` option adds `feed=longpoll`.
    pub fn encode(&self, kind: QueryKind) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = kind
            .allowed_keys()
            .iter()
            .filter_map(|key| {
                self.0
                    .get(*key)
                    .map(|value| (key.to_string(), value.to_string()))
            })
            .collect();

        for key in self.0.keys() {
            if !kind.allowed_keys().contains(&key.as_str()) && key != LONGPOLL_KEY {
                tracing::trace!(key = %key, "dropping unrecognized query parameter");
            }
        }

        if kind == QueryKind::Changes && self.is_longpoll() {
            pairs.push(("feed".to_string(), "longpoll".to_string()));
        }

        pairs
    }
}

impl From<Map<String, Value>> for QueryParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Value> for QueryParams {
    /// Non-object values carry no options.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}
