//! In-process document store.
//!
//! Keeps every collection in a `BTreeMap` so primary-key scans come out
//! ordered, and mirrors CouchDB's change-feed semantics: every write bumps a
//! global sequence number, and the feed reports each document at most once,
//! at its latest sequence.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use super::{
    Change, ChangeBatch, DocumentStore, Revision, Row, ScanOptions, ScanResult, Selector, Seq,
    StoreError, Versioned,
};

#[derive(Clone)]
struct Entry {
    doc: Value,
    generation: u64,
    revision: Revision,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Entry>>,
    seq: u64,
}

impl Inner {
    fn collection_mut(&mut self, name: &str) -> &mut BTreeMap<String, Entry> {
        self.collections.entry(name.to_string()).or_default()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    changes: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Inner::default()),
            changes,
        }
    }

    fn revision(generation: u64) -> Revision {
        Revision(format!("{}-{}", generation, Uuid::new_v4().simple()))
    }

    fn publish(&self, seq: u64) {
        // send_replace never fails, even with no receivers
        self.changes.send_replace(seq);
    }

    fn parse_seq(since: &Seq) -> Result<u64, StoreError> {
        // Accept CouchDB-style "N-opaque" cursors as well as plain numbers
        let head = since.0.split('-').next().unwrap_or_default();
        if head.is_empty() || head == "now" {
            return Ok(0);
        }
        head.parse()
            .map_err(|_| StoreError::Malformed(format!("invalid sequence cursor '{}'", since)))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        body: Value,
    ) -> Result<Versioned<String>, StoreError> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let mut inner = self.inner.write().await;
        if inner.collection_mut(collection).contains_key(&id) {
            return Err(StoreError::Conflict);
        }
        let seq = inner.next_seq();
        let revision = Self::revision(1);
        inner.collection_mut(collection).insert(
            id.clone(),
            Entry {
                doc: body,
                generation: 1,
                revision: revision.clone(),
                seq,
            },
        );
        drop(inner);

        self.publish(seq);
        Ok(Versioned::new(id, revision))
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Versioned<Value>, StoreError> {
        let inner = self.inner.read().await;
        inner
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|e| Versioned::new(e.doc.clone(), e.revision.clone()))
            .ok_or(StoreError::NotFound)
    }

    async fn write(
        &self,
        collection: &str,
        id: &str,
        revision: &Revision,
        body: Value,
    ) -> Result<Revision, StoreError> {
        let mut inner = self.inner.write().await;
        let seq = inner.seq + 1;
        let entry = inner
            .collection_mut(collection)
            .get_mut(id)
            .ok_or(StoreError::NotFound)?;
        if &entry.revision != revision {
            return Err(StoreError::Conflict);
        }
        entry.generation += 1;
        entry.revision = Self::revision(entry.generation);
        entry.doc = body;
        entry.seq = seq;
        let new_revision = entry.revision.clone();
        inner.seq = seq;
        drop(inner);

        self.publish(seq);
        Ok(new_revision)
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        revision: &Revision,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let docs = inner.collection_mut(collection);
        let current = docs
            .get(id)
            .map(|e| e.revision.clone())
            .ok_or(StoreError::NotFound)?;
        if &current != revision {
            return Err(StoreError::Conflict);
        }
        docs.remove(id);
        let seq = inner.next_seq();
        drop(inner);

        self.publish(seq);
        Ok(())
    }

    async fn range_scan(
        &self,
        collection: &str,
        opts: ScanOptions,
    ) -> Result<ScanResult, StoreError> {
        let inner = self.inner.read().await;
        let Some(docs) = inner.collections.get(collection) else {
            return Ok(ScanResult {
                total_rows: 0,
                offset: 0,
                rows: Vec::new(),
            });
        };

        let total_rows = docs.len();
        let ordered: Vec<(&String, &Entry)> = if opts.descending {
            docs.iter().rev().collect()
        } else {
            docs.iter().collect()
        };

        let start = match &opts.start_key {
            None => 0,
            Some(key) if opts.descending => ordered.partition_point(|(k, _)| k.as_str() > key.as_str()),
            Some(key) => ordered.partition_point(|(k, _)| k.as_str() < key.as_str()),
        };
        let offset = start.saturating_add(opts.skip).min(total_rows);

        let rows = ordered
            .into_iter()
            .skip(offset)
            .take(opts.limit)
            .map(|(k, e)| Row {
                key: k.clone(),
                doc: e.doc.clone(),
            })
            .collect();

        Ok(ScanResult {
            total_rows,
            offset,
            rows,
        })
    }

    async fn find(
        &self,
        collection: &str,
        selector: &Selector,
    ) -> Result<Vec<Versioned<Row>>, StoreError> {
        let inner = self.inner.read().await;
        let Some(docs) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(id, e)| selector.matches(id, &e.doc))
            .map(|(id, e)| {
                Versioned::new(
                    Row {
                        key: id.clone(),
                        doc: e.doc.clone(),
                    },
                    e.revision.clone(),
                )
            })
            .collect())
    }

    async fn watch(
        &self,
        collection: &str,
        selector: &Selector,
        since: &Seq,
        timeout: Duration,
    ) -> Result<ChangeBatch, StoreError> {
        let since = Self::parse_seq(since)?;
        let deadline = tokio::time::Instant::now() + timeout;
        // Subscribe before looking so a write between the check and the wait is not lost
        let mut rx = self.changes.subscribe();

        loop {
            let (mut pending, current) = {
                let inner = self.inner.read().await;
                let pending: Vec<Change> = inner
                    .collections
                    .get(collection)
                    .map(|docs| {
                        docs.iter()
                            .filter(|(id, e)| e.seq > since && selector.matches(id, &e.doc))
                            .map(|(id, e)| Change {
                                seq: Seq(e.seq.to_string()),
                                id: id.clone(),
                                doc: e.doc.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                (pending, inner.seq)
            };

            if !pending.is_empty() {
                pending.sort_by_key(|c| c.seq.0.parse::<u64>().unwrap_or_default());
                let last_seq = pending
                    .last()
                    .map(|c| c.seq.clone())
                    .unwrap_or_default();
                return Ok(ChangeBatch {
                    results: pending,
                    last_seq,
                });
            }

            let empty = ChangeBatch {
                results: Vec::new(),
                last_seq: Seq(current.to_string()),
            };
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(empty);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => return Ok(empty),
            }
        }
    }

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.inner.write().await.collection_mut(collection);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
