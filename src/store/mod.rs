//! Document store capability.
//!
//! Tokens and interactions live in an external document store. This module
//! defines the narrow capability the rest of the crate relies on: keyed
//! create/read/write/delete with optimistic concurrency, an ordered range
//! scan, a filtered query and a long-poll change feed.
//!
//! Backends:
//!   - [`memory::MemoryStore`]: in-process, used by tests and `memory://` dev runs.
//!   - [`couch::CouchStore`]: CouchDB over HTTP.

pub mod couch;
pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    #[error("revision conflict")]
    Conflict,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Opaque revision tag compared by the store at write time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub String);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque change-feed cursor. The default value points at the start of the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seq(pub String);

impl Default for Seq {
    fn default() -> Self {
        Seq("0".to_string())
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Seq {
    fn from(s: &str) -> Self {
        Seq(s.to_string())
    }
}

/// A value together with the revision it was read at.
///
/// Read-modify-write cycles pass the revision back to [`DocumentStore::write`];
/// a concurrent writer that got there first makes the write fail with
/// [`StoreError::Conflict`].
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub revision: Revision,
}

impl<T> Versioned<T> {
    pub fn new(value: T, revision: Revision) -> Self {
        Self { value, revision }
    }
}

/// Parameters of an ordered primary-key scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOptions {
    pub skip: usize,
    pub limit: usize,
    pub descending: bool,
    pub start_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: String,
    pub doc: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub total_rows: usize,
    /// Rows preceding the first returned row, in scan order.
    pub offset: usize,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub seq: Seq,
    pub id: String,
    pub doc: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub results: Vec<Change>,
    pub last_seq: Seq,
}

/// Predicate over stored documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    All,
    IdEq(String),
    FieldEq(String, Value),
    FieldIn(String, Vec<Value>),
    /// Field is present and compares greater than or equal (strings lexicographically).
    FieldGte(String, Value),
    And(Vec<Selector>),
}

impl Selector {
    pub fn field_eq(field: &str, value: impl Into<Value>) -> Self {
        Selector::FieldEq(field.to_string(), value.into())
    }

    pub fn field_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Selector::FieldIn(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn field_gte(field: &str, value: impl Into<Value>) -> Self {
        Selector::FieldGte(field.to_string(), value.into())
    }

    pub fn matches(&self, id: &str, doc: &Value) -> bool {
        match self {
            Selector::All => true,
            Selector::IdEq(want) => want == id,
            Selector::FieldEq(field, want) => doc.get(field) == Some(want),
            Selector::FieldIn(field, wants) => doc.get(field).is_some_and(|v| wants.contains(v)),
            Selector::FieldGte(field, bound) => match (doc.get(field), bound) {
                (Some(Value::String(a)), Value::String(b)) => a.as_str() >= b.as_str(),
                (Some(Value::Number(a)), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => a >= b,
                    _ => false,
                },
                _ => false,
            },
            Selector::And(parts) => parts.iter().all(|s| s.matches(id, doc)),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document. With `id == None` the store assigns one.
    /// Returns the id that was used.
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        body: Value,
    ) -> Result<Versioned<String>, StoreError>;

    async fn read(&self, collection: &str, id: &str) -> Result<Versioned<Value>, StoreError>;

    async fn write(
        &self,
        collection: &str,
        id: &str,
        revision: &Revision,
        body: Value,
    ) -> Result<Revision, StoreError>;

    async fn delete(&self, collection: &str, id: &str, revision: &Revision)
        -> Result<(), StoreError>;

    async fn range_scan(&self, collection: &str, opts: ScanOptions)
        -> Result<ScanResult, StoreError>;

    async fn find(
        &self,
        collection: &str,
        selector: &Selector,
    ) -> Result<Vec<Versioned<Row>>, StoreError>;

    /// Number of documents matching `selector`. Built on [`find`](Self::find),
    /// so it shares that call's backend result cap (10 000 rows for CouchDB).
    async fn count(&self, collection: &str, selector: &Selector) -> Result<usize, StoreError> {
        Ok(self.find(collection, selector).await?.len())
    }

    /// Long-poll the change feed. Returns as soon as at least one matching
    /// change newer than `since` exists, or an empty batch after `timeout`.
    async fn watch(
        &self,
        collection: &str,
        selector: &Selector,
        since: &Seq,
        timeout: Duration,
    ) -> Result<ChangeBatch, StoreError>;

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError>;

    /// Cheap reachability probe used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn DocumentStore>;

/// Build a store from a `TOKENQ_STORE_URL`-style URL.
pub fn connect(url: &str) -> anyhow::Result<SharedStore> {
    if url.is_empty() || url.starts_with("memory:") {
        tracing::info!("using in-memory document store");
        return Ok(Arc::new(memory::MemoryStore::new()));
    }
    let store = couch::CouchStore::new(url)?;
    tracing::info!(url = %store.redacted_url(), "using CouchDB document store");
    Ok(Arc::new(store))
}
