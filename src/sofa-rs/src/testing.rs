//! In-memory transports for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::connection::{Connection, Endpoint};
use crate::transport::{PreparedRequest, RawResponse, Transport};
use crate::BoxError;

/// A scripted reply
pub enum Canned {
    Reply {
        status: u16,
        content_type: String,
        body: Vec<u8>,
    },
    Refused,
}

impl Canned {
    pub fn json(status: u16, body: Value) -> Self {
        Canned::Reply {
            status,
            content_type: "application/json".to_string(),
            body: body.to_string().into_bytes(),
        }
    }

    pub fn text(status: u16, content_type: &str, body: &str) -> Self {
        Canned::Reply {
            status,
            content_type: content_type.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn refused() -> Self {
        Canned::Refused
    }
}

fn raw_response(status: u16, content_type: &str, body: Vec<u8>) -> RawResponse {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(CONTENT_TYPE, value);
    }

    // Deliver in small chunks so readers see more than one
    let chunks: Vec<Result<Bytes, BoxError>> = body
        .chunks(1000)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();

    RawResponse {
        status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        headers,
        body: stream::iter(chunks).boxed(),
    }
}

/// Replays canned replies in order and records every request
pub struct MockTransport {
    replies: Mutex<VecDeque<Canned>>,
    requests: Mutex<Vec<PreparedRequest>>,
}

impl MockTransport {
    pub fn new(replies: Vec<Canned>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> PreparedRequest {
        self.requests().pop().expect("no request was sent")
    }

    pub fn last_body(&self) -> Value {
        let body = self.last_request().body.expect("request had no body");
        serde_json::from_slice(&body).unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, BoxError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no canned reply left");

        match reply {
            Canned::Reply {
                status,
                content_type,
                body,
            } => Ok(raw_response(status, &content_type, body)),
            Canned::Refused => Err("connection refused".into()),
        }
    }
}

pub fn mock_connection(mock: &Arc<MockTransport>) -> Connection {
    Connection::with_transport(Endpoint::new("localhost", 5984).unwrap(), mock.clone())
}

struct StoredDoc {
    rev: u64,
    seq: u64,
    deleted: bool,
    body: Map<String, Value>,
}

/// A single-database in-memory server with real revision checks
///
/// Every request yields to the scheduler before it is answered, so
/// concurrently awaited callers interleave.
#[derive(Default)]
pub struct FakeCouch {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    docs: HashMap<String, StoredDoc>,
    seq: u64,
    puts: u64,
    conflicts: u64,
}

impl FakeCouch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection(self: &Arc<Self>) -> Connection {
        Connection::with_transport(Endpoint::new("localhost", 5984).unwrap(), self.clone())
    }

    pub fn doc(&self, id: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .docs
            .get(id)
            .filter(|doc| !doc.deleted)
            .map(|doc| Value::Object(doc.body.clone()))
    }

    pub fn conflicts(&self) -> u64 {
        self.state.lock().unwrap().conflicts
    }

    pub fn puts(&self) -> u64 {
        self.state.lock().unwrap().puts
    }

    fn handle(&self, request: &PreparedRequest) -> (u16, Value) {
        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|segments| segments.map(str::to_string).collect())
            .unwrap_or_default();
        let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let mut state = self.state.lock().unwrap();

        match (&request.method, segments.as_slice()) {
            (&Method::GET, [db]) => (
                200,
                json!({
                    "db_name": db,
                    "doc_count": state.docs.values().filter(|doc| !doc.deleted).count(),
                    "update_seq": state.seq,
                }),
            ),
            (&Method::GET, [_, feed]) if feed == "_changes" => {
                let since: u64 = query
                    .get("since")
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(0);
                let limit: usize = query
                    .get("limit")
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(usize::MAX);
                let mut entries: Vec<(&String, &StoredDoc)> = state
                    .docs
                    .iter()
                    .filter(|(_, doc)| doc.seq > since)
                    .collect();
                entries.sort_by_key(|(_, doc)| doc.seq);
                let results: Vec<Value> = entries
                    .into_iter()
                    .take(limit)
                    .map(|(id, doc)| {
                        json!({
                            "seq": doc.seq,
                            "id": id,
                            "changes": [{"rev": format!("{}-fake", doc.rev)}],
                            "doc": Value::Object(doc.body.clone()),
                            "deleted": doc.deleted,
                        })
                    })
                    .collect();
                let last_seq = results.last().map(|r| r["seq"].clone()).unwrap_or(json!(since));
                (200, json!({"results": results, "last_seq": last_seq}))
            }
            (&Method::GET, [_, id]) => match state.docs.get(id).filter(|doc| !doc.deleted) {
                Some(doc) => (200, Value::Object(doc.body.clone())),
                None => (404, json!({"error": "not_found", "reason": "missing"})),
            },
            (&Method::PUT, [_, id]) => {
                let body: Map<String, Value> = request
                    .body
                    .as_ref()
                    .and_then(|body| serde_json::from_slice(body).ok())
                    .unwrap_or_default();
                let sent_rev = body.get("_rev").and_then(Value::as_str).map(str::to_string);
                let current_rev = state
                    .docs
                    .get(id)
                    .filter(|doc| !doc.deleted)
                    .map(|doc| format!("{}-fake", doc.rev));

                if sent_rev != current_rev {
                    state.conflicts += 1;
                    return (
                        409,
                        json!({"error": "conflict", "reason": "Document update conflict."}),
                    );
                }

                state.puts += 1;
                state.seq += 1;
                let rev = state.docs.get(id).map(|doc| doc.rev).unwrap_or(0) + 1;
                let rev_str = format!("{}-fake", rev);
                let mut stored = body;
                stored.insert("_rev".to_string(), json!(rev_str));
                let seq = state.seq;
                state.docs.insert(
                    id.clone(),
                    StoredDoc {
                        rev,
                        seq,
                        deleted: false,
                        body: stored,
                    },
                );
                (201, json!({"ok": true, "id": id, "rev": rev_str}))
            }
            (&Method::DELETE, [_, id]) => {
                let current = state.docs.get(id).filter(|doc| !doc.deleted).map(|doc| doc.rev);
                let Some(current) = current else {
                    return (404, json!({"error": "not_found", "reason": "deleted"}));
                };
                if query.get("rev") != Some(&format!("{}-fake", current)) {
                    state.conflicts += 1;
                    return (
                        409,
                        json!({"error": "conflict", "reason": "Document update conflict."}),
                    );
                }

                state.seq += 1;
                let rev = current + 1;
                let rev_str = format!("{}-fake", rev);
                let mut tombstone = Map::new();
                tombstone.insert("_id".to_string(), json!(id));
                tombstone.insert("_rev".to_string(), json!(rev_str));
                tombstone.insert("_deleted".to_string(), json!(true));
                let seq = state.seq;
                state.docs.insert(
                    id.clone(),
                    StoredDoc {
                        rev,
                        seq,
                        deleted: true,
                        body: tombstone,
                    },
                );
                (200, json!({"ok": true, "id": id, "rev": rev_str}))
            }
            _ => (400, json!({"error": "bad_request"})),
        }
    }
}

#[async_trait]
impl Transport for FakeCouch {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, BoxError> {
        tokio::task::yield_now().await;
        let (status, body) = self.handle(&request);
        Ok(raw_response(status, "application/json", body.to_string().into_bytes()))
    }
}
