//! Sofa Client Library
//!
//! HTTP client for CouchDB-style document databases: document CRUD with
//! revision-conflict retry, view queries, bulk writes and the change feed.

mod bulk;
mod changes;
pub mod completion;
pub mod connection;
pub mod database;
pub mod transport;
mod update;
mod view;

#[cfg(test)]
mod testing;

pub use connection::{Body, Connection, Endpoint, RequestBody, Response, ERROR_BODY_LIMIT};
pub use database::{Database, DeleteOptions, PutOptions};
pub use sofa_core::config::{Config, UpdateRetryConfig};
pub use sofa_core::query::{QueryKind, QueryParams};
pub use sofa_core::{
    ChangeEntry, ChangesResult, DbInfo, Document, UpdateAllSummary, ViewResult, ViewRow,
    WriteResult,
};
pub use transport::{BodyStream, HttpTransport, PreparedRequest, RawResponse, Transport};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("Failed to decode JSON response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("{context}: status {status}: {body}")]
    Status {
        status: u16,
        context: String,
        body: String,
    },

    #[error("Gave up updating doc {id} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { id: String, attempts: u32 },

    #[error("Document mutator failed: {0}")]
    Mutator(#[source] anyhow::Error),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

impl ClientError {
    /// HTTP status carried by a `Status` error
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
