use serde::Serialize;

use sofa_core::models::WriteResult;

use crate::connection::RequestBody;
use crate::database::Database;
use crate::{ClientError, Result};

#[derive(Serialize)]
struct BulkDocsRequest<'a, T> {
    docs: &'a [T],
    all_or_nothing: bool,
}

impl Database {
    /// Submit a batch of documents in one request
    ///
    /// Success is status 201 and yields one WriteResult per document, in order.
    /// Per-document conflicts are reported inside those results.
    pub async fn post_bulk_docs<T: Serialize>(
        &self,
        docs: &[T],
        all_or_nothing: bool,
    ) -> Result<Vec<WriteResult>> {
        let body = serde_json::to_value(BulkDocsRequest {
            docs,
            all_or_nothing,
        })
        .map_err(ClientError::Encode)?;

        let response = self
            .connection()
            .post(self.url(&["_bulk_docs"], &[]), RequestBody::Json(body))
            .await?;

        if response.status() != 201 {
            return Err(response.status_error("error posting to _bulk_docs").await);
        }
        tracing::debug!(db = %self.name(), count = docs.len(), "bulk write accepted");
        response.decode()
    }
}
