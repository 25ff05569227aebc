use serde::Serialize;

use sofa_core::models::ViewResult;
use sofa_core::query::{QueryKind, QueryParams};

use crate::connection::RequestBody;
use crate::database::Database;
use crate::{ClientError, Result};

const ALL_DOCS: &str = "_all_docs";

#[derive(Serialize)]
struct KeysRequest<'a, K> {
    keys: &'a [K],
}

fn design_view_path(design: &str, view: &str) -> String {
    format!("_design/{}/_view/{}", design, view)
}

impl Database {
    /// GET a view at `path` (relative to the database) with allow-listed,
    /// JSON-encoded parameters
    pub async fn view_query(&self, path: &str, params: &QueryParams) -> Result<ViewResult> {
        let segments: Vec<&str> = path.split('/').collect();
        let query = params.encode(QueryKind::View);
        let response = self.connection().get(self.url(&segments, &query)).await?;

        if response.status() != 200 {
            return Err(response
                .status_error(format!("error reading view {}", path))
                .await);
        }
        response.decode()
    }

    pub async fn view(&self, design: &str, view: &str, params: &QueryParams) -> Result<ViewResult> {
        self.view_query(&design_view_path(design, view), params).await
    }

    pub async fn all_docs(&self, params: &QueryParams) -> Result<ViewResult> {
        self.view_query(ALL_DOCS, params).await
    }

    /// POST `{"keys": [...]}` to a view; for key sets too large for a URL
    pub async fn view_keys_query<K: Serialize>(&self, path: &str, keys: &[K]) -> Result<ViewResult> {
        let segments: Vec<&str> = path.split('/').collect();
        let body = serde_json::to_value(KeysRequest { keys }).map_err(ClientError::Encode)?;
        let response = self
            .connection()
            .post(self.url(&segments, &[]), RequestBody::Json(body))
            .await?;

        if response.status() != 200 {
            return Err(response
                .status_error(format!("error reading view {}", path))
                .await);
        }
        response.decode()
    }

    pub async fn view_keys<K: Serialize>(
        &self,
        design: &str,
        view: &str,
        keys: &[K],
    ) -> Result<ViewResult> {
        self.view_keys_query(&design_view_path(design, view), keys).await
    }

    pub async fn all_docs_keys<K: Serialize>(&self, keys: &[K]) -> Result<ViewResult> {
        self.view_keys_query(ALL_DOCS, keys).await
    }
}
