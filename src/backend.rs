// Hosted backend collaborator
// A generic row store: insert records into a named collection, and query/delete them with
// exact-match predicates. The storefront never talks to a database directly.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError { status_code: u16, message: String },

    #[error("No matching row in {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::SerializationError(e.to_string())
    }
}

// Exact-match predicate on one column
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    // Backends compare as text, so 7 and "7" match
    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column)
            .map_or(false, |field| values_match(field, &self.value))
    }
}

pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn values_match(a: &Value, b: &Value) -> bool {
    a == b || (!a.is_null() && !b.is_null() && value_text(a) == value_text(b))
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    // Insert all rows as one request. Returns the stored rows (with backend-assigned ids).
    async fn insert(&self, collection: &str, rows: Vec<Value>) -> Result<Vec<Value>, BackendError>;

    // Rows matching every filter. An empty column list selects all columns.
    async fn select(
        &self,
        collection: &str,
        filters: &[Filter],
        columns: &[&str],
    ) -> Result<Vec<Value>, BackendError>;

    // Exactly one matching row
    async fn single(
        &self,
        collection: &str,
        filters: &[Filter],
        columns: &[&str],
    ) -> Result<Value, BackendError> {
        let mut rows = self.select(collection, filters, columns).await?;
        match rows.len() {
            0 => Err(BackendError::NotFound(collection.to_string())),
            1 => Ok(rows.remove(0)),
            n => Err(BackendError::ApiResponseError {
                status_code: 406,
                message: format!("Expected a single row from {}, got {}", collection, n),
            }),
        }
    }

    // Merge the patch object into every matching row. Returns the updated rows.
    async fn update(
        &self,
        collection: &str,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>, BackendError>;

    // Returns the number of rows deleted
    async fn delete(&self, collection: &str, filters: &[Filter]) -> Result<usize, BackendError>;

    // Session token of the signed-in user; None falls back to anonymous access
    fn set_access_token(&self, _token: Option<String>) {}
}

// Backend held in process memory. Used for local development and as the test double for the
// hosted service. Failures and latency can be injected.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    tables: DashMap<String, Vec<Value>>,
    next_id: AtomicI64,
    fail_next_requests: AtomicUsize,
    delay_ms: AtomicU64,
    insert_calls: AtomicUsize,
    request_count: AtomicUsize,
    access_token: RwLock<Option<String>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    // Load rows without going through the request path (no id assignment, no failure injection)
    pub fn seed(&self, collection: &str, rows: Vec<Value>) {
        self.tables
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.tables
            .get(collection)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn fail_next_requests(&self, count: usize) {
        self.fail_next_requests.store(count, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay_ms: u64) {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().clone()
    }

    async fn begin_request(&self) -> Result<(), BackendError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failed = self
            .fail_next_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BackendError::ApiResponseError {
                status_code: 500,
                message: "Internal Server Error".to_string(),
            });
        }
        Ok(())
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn project(row: &Value, columns: &[&str]) -> Value {
    if columns.is_empty() || columns.contains(&"*") {
        return row.clone();
    }
    let mut projected = Map::new();
    for column in columns {
        if let Some(value) = row.get(*column) {
            projected.insert((*column).to_string(), value.clone());
        }
    }
    Value::Object(projected)
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn insert(&self, collection: &str, rows: Vec<Value>) -> Result<Vec<Value>, BackendError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.begin_request().await?;

        // All-or-nothing: validate the whole batch before storing any of it
        if let Some(bad) = rows.iter().find(|row| !row.is_object()) {
            return Err(BackendError::ApiResponseError {
                status_code: 400,
                message: format!("Row is not an object: {}", bad),
            });
        }

        let stored: Vec<Value> = rows
            .into_iter()
            .map(|mut row| {
                if let Some(object) = row.as_object_mut() {
                    if !object.contains_key("id") {
                        object.insert("id".to_string(), Value::from(self.next_id()));
                    }
                }
                row
            })
            .collect();

        debug!("Inserted {} rows into {}", stored.len(), collection);
        self.tables
            .entry(collection.to_string())
            .or_default()
            .extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn select(
        &self,
        collection: &str,
        filters: &[Filter],
        columns: &[&str],
    ) -> Result<Vec<Value>, BackendError> {
        self.begin_request().await?;

        let rows = match self.tables.get(collection) {
            Some(rows) => rows
                .iter()
                .filter(|row| filters.iter().all(|f| f.matches(row)))
                .map(|row| project(row, columns))
                .collect(),
            None => Vec::new(),
        };
        Ok(rows)
    }

    async fn update(
        &self,
        collection: &str,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>, BackendError> {
        self.begin_request().await?;

        let patch = match patch {
            Value::Object(patch) => patch,
            other => {
                return Err(BackendError::ApiResponseError {
                    status_code: 400,
                    message: format!("Patch is not an object: {}", other),
                })
            }
        };

        let updated: Vec<Value> = match self.tables.get_mut(collection) {
            Some(mut rows) => rows
                .iter_mut()
                .filter(|row| filters.iter().all(|f| f.matches(row)))
                .map(|row| {
                    if let Some(object) = row.as_object_mut() {
                        object.extend(patch.clone());
                    }
                    row.clone()
                })
                .collect(),
            None => Vec::new(),
        };
        debug!("Updated {} rows in {}", updated.len(), collection);
        Ok(updated)
    }

    async fn delete(&self, collection: &str, filters: &[Filter]) -> Result<usize, BackendError> {
        self.begin_request().await?;

        let removed = match self.tables.get_mut(collection) {
            Some(mut rows) => {
                let before = rows.len();
                rows.retain(|row| !filters.iter().all(|f| f.matches(row)));
                before - rows.len()
            }
            None => 0,
        };
        debug!("Deleted {} rows from {}", removed, collection);
        Ok(removed)
    }

    fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_ids_and_selects() {
        let backend = InMemoryBackend::new();
        let stored = backend
            .insert(
                "bookings",
                vec![
                    json!({"user_id": "u1", "event_id": 4}),
                    json!({"user_id": "u2", "event_id": 5}),
                ],
            )
            .await
            .unwrap();

        assert_eq!(stored[0]["id"], json!(1));
        assert_eq!(stored[1]["id"], json!(2));

        let rows = backend
            .select("bookings", &[Filter::eq("user_id", "u1")], &["event_id"])
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"event_id": 4})]);
    }

    #[tokio::test]
    async fn test_filter_compares_as_text() {
        let backend = InMemoryBackend::new();
        backend.seed("events", vec![json!({"id": 7, "title": "Jazz Night"})]);

        let row = backend
            .single("events", &[Filter::eq("id", "7")], &["title"])
            .await
            .unwrap();
        assert_eq!(row, json!({"title": "Jazz Night"}));
    }

    #[tokio::test]
    async fn test_single_reports_missing_and_ambiguous() {
        let backend = InMemoryBackend::new();
        backend.seed("events", vec![json!({"id": 1, "city": "Oslo"}), json!({"id": 2, "city": "Oslo"})]);

        let missing = backend.single("events", &[Filter::eq("id", 9)], &[]).await;
        assert_eq!(missing, Err(BackendError::NotFound("events".to_string())));

        let ambiguous = backend.single("events", &[Filter::eq("city", "Oslo")], &[]).await;
        assert!(matches!(
            ambiguous,
            Err(BackendError::ApiResponseError { status_code: 406, .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_injection_leaves_table_untouched() {
        let backend = InMemoryBackend::new();
        backend.fail_next_requests(1);

        let result = backend.insert("bookings", vec![json!({"user_id": "u1"})]).await;
        assert!(result.is_err());
        assert!(backend.rows("bookings").is_empty());

        let result = backend.insert("bookings", vec![json!({"user_id": "u1"})]).await;
        assert!(result.is_ok());
        assert_eq!(backend.insert_calls(), 2);
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_update_merges_patch_into_matching_rows() {
        let backend = InMemoryBackend::new();
        backend.seed(
            "users",
            vec![json!({"id": "u1", "name": "Ada"}), json!({"id": "u2", "name": "Kim"})],
        );

        let updated = backend
            .update("users", &[Filter::eq("id", "u1")], json!({"name": "Ada L"}))
            .await
            .unwrap();

        assert_eq!(updated, vec![json!({"id": "u1", "name": "Ada L"})]);
        assert_eq!(
            backend.rows("users"),
            vec![json!({"id": "u1", "name": "Ada L"}), json!({"id": "u2", "name": "Kim"})]
        );

        let untouched = backend
            .update("users", &[Filter::eq("id", "u9")], json!({"name": "Nobody"}))
            .await
            .unwrap();
        assert!(untouched.is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_non_object_patch() {
        let backend = InMemoryBackend::new();
        backend.seed("users", vec![json!({"id": "u1", "name": "Ada"})]);

        let result = backend.update("users", &[], json!("Ada")).await;
        assert!(matches!(
            result,
            Err(BackendError::ApiResponseError { status_code: 400, .. })
        ));
        assert_eq!(backend.rows("users"), vec![json!({"id": "u1", "name": "Ada"})]);
    }

    #[test]
    fn test_access_token_slot() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.access_token(), None);

        backend.set_access_token(Some("jwt-1".to_string()));
        assert_eq!(backend.access_token(), Some("jwt-1".to_string()));

        backend.set_access_token(None);
        assert_eq!(backend.access_token(), None);
    }

    #[tokio::test]
    async fn test_non_object_batch_is_rejected_whole() {
        let backend = InMemoryBackend::new();
        let result = backend
            .insert("bookings", vec![json!({"user_id": "u1"}), json!(3)])
            .await;

        assert!(matches!(
            result,
            Err(BackendError::ApiResponseError { status_code: 400, .. })
        ));
        assert!(backend.rows("bookings").is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let backend = InMemoryBackend::new();
        backend.seed("bookings", vec![json!({"id": 1}), json!({"id": 2})]);

        let removed = backend.delete("bookings", &[Filter::eq("id", 1)]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.rows("bookings"), vec![json!({"id": 2})]);
    }
}
