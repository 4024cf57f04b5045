//! Database adapter contract consumed by the plugin subsystem.
//!
//! The plugin registry, settings service and migration runner never talk to
//! a database directly. They go through [`DatabaseAdapter`], a small
//! document-store interface: named collections of JSON documents, queried
//! with field-equality filters.
//!
//! Optional storage features are exposed as capability traits returned by
//! the adapter itself ([`DatabaseAdapter::collections`],
//! [`DatabaseAdapter::claims`]), so callers know at compile time what they
//! can ask for instead of probing for methods at runtime.
//!
//! # Usage
//!
//! ```ignore
//! let db: Arc<dyn DatabaseAdapter> = Arc::new(MemoryAdapter::new());
//! db.insert("plugin_states", json!({ "pluginId": "seo" })).await?;
//! let rows = db.find_many("plugin_states", &filter([("pluginId", json!("seo"))])).await?;
//! ```

mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::{MemoryAdapter, Operation};
pub use postgres::PgDocumentAdapter;

/// Field-equality filter: a document matches when every key is present
/// with an equal value. An empty filter matches everything.
pub type Filter = Map<String, Value>;

/// Build a [`Filter`] from `(field, value)` pairs.
pub fn filter<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Filter {
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Check whether a document satisfies a filter.
pub fn matches(doc: &Value, filter: &Filter) -> bool {
    filter.iter().all(|(field, expected)| doc.get(field) == Some(expected))
}

/// Structured adapter failure: a stable code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct AdapterError {
    pub code: String,
    pub message: String,
}

impl AdapterError {
    /// The collection does not exist (strict stores only).
    pub const COLLECTION_NOT_FOUND: &'static str = "COLLECTION_NOT_FOUND";
    /// The collection name is not a valid identifier.
    pub const INVALID_COLLECTION: &'static str = "INVALID_COLLECTION";
    /// The document is not a JSON object or could not be (de)serialized.
    pub const INVALID_DOCUMENT: &'static str = "INVALID_DOCUMENT";
    /// The underlying database reported an error.
    pub const DATABASE_ERROR: &'static str = "DATABASE_ERROR";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn collection_not_found(collection: &str) -> Self {
        Self::new(
            Self::COLLECTION_NOT_FOUND,
            format!("collection '{collection}' does not exist"),
        )
    }

    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_DOCUMENT, message)
    }

    pub fn is_collection_not_found(&self) -> bool {
        self.code == Self::COLLECTION_NOT_FOUND
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_document(e.to_string())
    }
}

/// Uniform `{success, data, message, error}` envelope for reporting adapter
/// results outside the process (JSON output, admin APIs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AdapterError>,
}

impl<T> DbResponse<T> {
    /// Convert back into a `Result`. A failed envelope without an error
    /// payload becomes a generic `DATABASE_ERROR`.
    pub fn into_result(self) -> AdapterResult<Option<T>> {
        if self.success {
            return Ok(self.data);
        }
        Err(self.error.unwrap_or_else(|| {
            AdapterError::new(
                AdapterError::DATABASE_ERROR,
                self.message.unwrap_or_else(|| "operation failed".into()),
            )
        }))
    }
}

impl<T> From<AdapterResult<T>> for DbResponse<T> {
    fn from(result: AdapterResult<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                message: None,
                error: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                message: Some(e.message.clone()),
                error: Some(e),
            },
        }
    }
}

/// Result type alias for adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Document-store operations the plugin subsystem relies on.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Short name used in logs ("memory", "postgres").
    fn name(&self) -> &'static str;

    /// Number of documents in a collection.
    ///
    /// Doubles as an existence probe: stores that know which collections
    /// exist return [`AdapterError::COLLECTION_NOT_FOUND`] for unknown ones.
    async fn count(&self, collection: &str) -> AdapterResult<u64>;

    /// Insert a document, returning it as stored (with an `_id`).
    async fn insert(&self, collection: &str, doc: Value) -> AdapterResult<Value>;

    /// Delete every matching document. Returns the number removed.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> AdapterResult<u64>;

    /// All matching documents, in insertion order.
    async fn find_many(&self, collection: &str, filter: &Filter) -> AdapterResult<Vec<Value>>;

    /// Shallow-merge `patch` into every matching document. Returns the
    /// number of documents updated.
    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Filter,
    ) -> AdapterResult<u64>;

    /// Explicit collection creation, when the store supports it.
    fn collections(&self) -> Option<&dyn CollectionManager> {
        None
    }

    /// Exclusive claim rows, when the store can back them with a unique
    /// constraint.
    fn claims(&self) -> Option<&dyn ClaimStore> {
        None
    }
}

/// Explicit schema materialization.
#[async_trait]
pub trait CollectionManager: Send + Sync {
    /// Create a collection. Creating an existing collection is not an error.
    async fn create_collection(&self, name: &str) -> AdapterResult<()>;
}

/// Named, expiring, single-owner claims shared by every process using the
/// same store.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Claim `key` for `owner` for `ttl`.
    ///
    /// Returns `Ok(false)` while a different owner holds an unexpired claim.
    /// Re-claiming your own key refreshes it; expired claims are taken over.
    async fn try_claim(&self, key: &str, owner: &str, ttl: Duration) -> AdapterResult<bool>;

    /// Release a claim held by `owner`. Returns whether a claim was removed.
    async fn release(&self, key: &str, owner: &str) -> AdapterResult<bool>;
}

/// Typed helpers over [`DatabaseAdapter`].
///
/// Automatically implemented for every adapter, including `dyn DatabaseAdapter`.
#[async_trait]
pub trait DatabaseAdapterExt: DatabaseAdapter {
    /// Serialize `record` and insert it.
    async fn insert_as<R>(&self, collection: &str, record: &R) -> AdapterResult<Value>
    where
        R: Serialize + Sync,
    {
        let doc = serde_json::to_value(record)?;
        self.insert(collection, doc).await
    }

    /// Find matching documents and deserialize each into `R`.
    async fn find_many_as<R>(&self, collection: &str, filter: &Filter) -> AdapterResult<Vec<R>>
    where
        R: DeserializeOwned + Send,
    {
        let docs = self.find_many(collection, filter).await?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(AdapterError::from))
            .collect()
    }
}

impl<A: ?Sized + DatabaseAdapter> DatabaseAdapterExt for A {}
