use url::Url;

use sofa_core::config::{Config, UpdateRetryConfig};
use sofa_core::models::{is_design_id, DbInfo, Document, WriteResult};

use crate::connection::{Connection, RequestBody};
use crate::{ClientError, Result};

/// Options for a single document write
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Ask the server to acknowledge before the write is durable (`?batch=ok`)
    pub batch: bool,
    /// Return a 409 as a not-ok WriteResult instead of an error
    pub conflict_ok: bool,
}

impl PutOptions {
    pub fn conflict_ok() -> Self {
        Self {
            conflict_ok: true,
            ..Default::default()
        }
    }

    pub fn batch() -> Self {
        Self {
            batch: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub conflict_ok: bool,
}

/// Database is a handle for one named database on a connection
///
/// Stateless apart from its name and retry settings; cheap to clone.
#[derive(Clone)]
pub struct Database {
    connection: Connection,
    name: String,
    pub(crate) retry: UpdateRetryConfig,
    pub(crate) changes_batch_size: u64,
}

impl Database {
    pub fn new(connection: Connection, name: impl Into<String>) -> Self {
        let defaults = Config::default();
        Self {
            connection,
            name: name.into(),
            retry: defaults.update,
            changes_batch_size: defaults.changes_batch_size,
        }
    }

    /// Handle for `config.database`, with the configured retry settings
    pub fn from_config(connection: Connection, config: &Config) -> Self {
        Self::new(connection, config.database.clone())
            .with_retry(config.update.clone())
            .with_changes_batch_size(config.changes_batch_size)
    }

    pub fn with_retry(mut self, retry: UpdateRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_changes_batch_size(mut self, size: u64) -> Self {
        self.changes_batch_size = size.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// URL under this database: `/{db}/{segments...}?{query}`
    pub(crate) fn url(&self, segments: &[&str], query: &[(String, String)]) -> Url {
        let mut all = Vec::with_capacity(segments.len() + 1);
        all.push(self.name.as_str());
        all.extend_from_slice(segments);
        self.connection.endpoint().url(&all, query)
    }

    /// Document URL. Design document ids keep their slashes; any other id is
    /// escaped as one segment.
    pub fn doc_url(&self, id: &str, query: &[(String, String)]) -> Url {
        if is_design_id(id) {
            let segments: Vec<&str> = id.split('/').collect();
            self.url(&segments, query)
        } else {
            self.url(&[id], query)
        }
    }

    /// Database metadata
    pub async fn info(&self) -> Result<DbInfo> {
        let response = self.connection.get(self.url(&[], &[])).await?;
        if !response.status.is_success() {
            return Err(response
                .status_error(format!("error reading database {}", self.name))
                .await);
        }
        response.decode()
    }

    /// Fetch a document; `Ok(None)` when it does not exist
    pub async fn get_doc(&self, id: &str) -> Result<Option<Document>> {
        let response = self.connection.get(self.doc_url(id, &[])).await?;

        match response.status() {
            404 => Ok(None),
            200 => Ok(Some(response.decode()?)),
            _ => Err(response.status_error(format!("error getting doc {}", id)).await),
        }
    }

    /// Fetch a document and keep it only if `predicate` holds
    pub async fn get_doc_where<P>(&self, id: &str, predicate: P) -> Result<Option<Document>>
    where
        P: FnOnce(&Document) -> bool,
    {
        Ok(self.get_doc(id).await?.filter(|doc| predicate(doc)))
    }

    /// Create or overwrite a document
    ///
    /// Success is 201 or 202. With `conflict_ok`, a 409 comes back as a
    /// WriteResult with `ok == false`.
    pub async fn put_doc(&self, doc: &Document, options: PutOptions) -> Result<WriteResult> {
        if doc.id.is_empty() {
            return Err(ClientError::InvalidDocument(
                "document id is required before write".to_string(),
            ));
        }

        let query = if options.batch {
            vec![("batch".to_string(), "ok".to_string())]
        } else {
            Vec::new()
        };
        let body = serde_json::to_value(doc).map_err(ClientError::Encode)?;

        let response = self
            .connection
            .put(self.doc_url(&doc.id, &query), RequestBody::Json(body))
            .await?;

        match response.status() {
            201 | 202 => response.decode(),
            409 if options.conflict_ok => response.decode(),
            _ => Err(response.status_error(format!("error putting doc {}", doc.id)).await),
        }
    }

    /// Delete revision `rev` of a document
    pub async fn delete_doc(
        &self,
        id: &str,
        rev: &str,
        options: DeleteOptions,
    ) -> Result<WriteResult> {
        let query = [("rev".to_string(), rev.to_string())];
        let response = self.connection.delete(self.doc_url(id, &query)).await?;

        match response.status() {
            200 => response.decode(),
            409 if options.conflict_ok => response.decode(),
            _ => Err(response.status_error(format!("error deleting doc {}", id)).await),
        }
    }
}
