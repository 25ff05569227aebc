use sofa_core::models::ChangesResult;
use sofa_core::query::{QueryKind, QueryParams};

use crate::database::Database;
use crate::Result;

impl Database {
    /// Read the change feed
    ///
    /// Only `filter`, `include_docs`, `limit`, `since` and `timeout` are
    /// forwarded. `longpoll: true` selects the long-poll feed, which the
    /// server holds open until a change arrives or `timeout` passes.
    pub async fn changes(&self, params: &QueryParams) -> Result<ChangesResult> {
        let query = params.encode(QueryKind::Changes);
        let response = self
            .connection()
            .get(self.url(&["_changes"], &query))
            .await?;

        if response.status() != 200 {
            return Err(response.status_error("error reading _changes").await);
        }
        response.decode()
    }
}
