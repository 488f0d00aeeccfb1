// REST client for the hosted backend
// Speaks the PostgREST dialect: one endpoint per collection, `column=eq.value` filters, and a
// `select` parameter for column projection.

use crate::backend::{value_text, Backend, BackendError, Filter};
use crate::config::BackendConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
    // Bearer token of the signed-in user; the API key is used when nobody is signed in
    access_token: RwLock<Option<String>>,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BackendError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: RwLock::new(None),
        })
    }

    pub fn collection_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection)
    }

    pub fn query_pairs(filters: &[Filter], columns: &[&str]) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(filters.len() + 1);
        let select = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(",")
        };
        pairs.push(("select".to_string(), select));
        for filter in filters {
            let predicate = match &filter.value {
                Value::Null => "is.null".to_string(),
                other => format!("eq.{}", value_text(other)),
            };
            pairs.push((filter.column.clone(), predicate));
        }
        pairs
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.api_key.clone());
        request.header("apikey", &self.api_key).bearer_auth(token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = self.authorized(request).send().await.map_err(|e| {
            error!("Backend request failed: {}", e);
            BackendError::NetworkError(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
        error!("Backend responded {}: {}", status, message);
        Err(BackendError::ApiResponseError {
            status_code: status.as_u16(),
            message,
        })
    }

    async fn rows(response: Response) -> Result<Vec<Value>, BackendError> {
        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::SerializationError(e.to_string()))?;
        match body {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn insert(&self, collection: &str, rows: Vec<Value>) -> Result<Vec<Value>, BackendError> {
        debug!("POST {} rows to {}", rows.len(), collection);
        let request = self
            .client
            .post(self.collection_url(collection))
            .header("Prefer", "return=representation")
            .json(&Value::Array(rows));
        let response = self.send(request).await?;
        Self::rows(response).await
    }

    async fn select(
        &self,
        collection: &str,
        filters: &[Filter],
        columns: &[&str],
    ) -> Result<Vec<Value>, BackendError> {
        debug!("GET {} with {} filters", collection, filters.len());
        let request = self
            .client
            .get(self.collection_url(collection))
            .query(&Self::query_pairs(filters, columns));
        let response = self.send(request).await?;
        Self::rows(response).await
    }

    async fn update(
        &self,
        collection: &str,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>, BackendError> {
        debug!("PATCH {} with {} filters", collection, filters.len());
        let request = self
            .client
            .patch(self.collection_url(collection))
            .header("Prefer", "return=representation")
            .query(&Self::query_pairs(filters, &[]))
            .json(&patch);
        let response = self.send(request).await?;
        Self::rows(response).await
    }

    async fn delete(&self, collection: &str, filters: &[Filter]) -> Result<usize, BackendError> {
        debug!("DELETE from {} with {} filters", collection, filters.len());
        let request = self
            .client
            .delete(self.collection_url(collection))
            .header("Prefer", "return=representation")
            .query(&Self::query_pairs(filters, &[]));
        let response = self.send(request).await?;
        Ok(Self::rows(response).await?.len())
    }

    fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }
}
