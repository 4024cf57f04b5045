//! In-process document store.
//!
//! Behaves like a schema-less document database: collections are
//! materialized by their first insert (or by an explicit
//! `create_collection`), reads of unknown collections return nothing, and
//! only the `count` probe reports a missing collection as an error.
//!
//! Used when no `DATABASE_URL` is configured, and by the test suites, which
//! can inject one-shot failures with [`MemoryAdapter::fail_next`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::{
    AdapterError, AdapterResult, ClaimStore, CollectionManager, DatabaseAdapter, Filter, matches,
};

/// Adapter operations that can have failures injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Count,
    Insert,
    DeleteMany,
    FindMany,
    UpdateMany,
    CreateCollection,
}

#[derive(Debug)]
struct Claim {
    owner: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Store {
    collections: HashMap<String, Vec<Value>>,
    claims: HashMap<String, Claim>,
    faults: Vec<(Operation, String)>,
}

impl Store {
    /// Consume a pending fault for `(op, collection)`, if any.
    fn take_fault(&mut self, op: Operation, collection: &str) -> AdapterResult<()> {
        match self
            .faults
            .iter()
            .position(|(o, c)| *o == op && c == collection)
        {
            Some(pos) => {
                self.faults.remove(pos);
                Err(AdapterError::new(
                    AdapterError::DATABASE_ERROR,
                    format!("injected {op:?} failure on '{collection}'"),
                ))
            }
            None => Ok(()),
        }
    }
}

/// In-memory [`DatabaseAdapter`].
#[derive(Debug)]
pub struct MemoryAdapter {
    store: RwLock<Store>,
    explicit_collections: bool,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    /// Create an empty store that supports explicit collection creation.
    pub fn new() -> Self {
        Self {
            store: RwLock::new(Store::default()),
            explicit_collections: true,
        }
    }

    /// Create an empty store without the [`CollectionManager`] capability,
    /// where collections only come into existence on first insert.
    pub fn without_collection_manager() -> Self {
        Self {
            store: RwLock::new(Store::default()),
            explicit_collections: false,
        }
    }

    /// Make the next `op` against `collection` fail with `DATABASE_ERROR`.
    pub fn fail_next(&self, op: Operation, collection: &str) {
        self.store.write().faults.push((op, collection.to_string()));
    }

    /// Whether a collection has been materialized.
    pub fn has_collection(&self, collection: &str) -> bool {
        self.store.read().collections.contains_key(collection)
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn count(&self, collection: &str) -> AdapterResult<u64> {
        let mut store = self.store.write();
        store.take_fault(Operation::Count, collection)?;
        store
            .collections
            .get(collection)
            .map(|docs| docs.len() as u64)
            .ok_or_else(|| AdapterError::collection_not_found(collection))
    }

    async fn insert(&self, collection: &str, mut doc: Value) -> AdapterResult<Value> {
        let mut store = self.store.write();
        store.take_fault(Operation::Insert, collection)?;

        let Some(obj) = doc.as_object_mut() else {
            return Err(AdapterError::invalid_document(format!(
                "documents inserted into '{collection}' must be JSON objects"
            )));
        };
        obj.entry("_id")
            .or_insert_with(|| Value::String(Uuid::now_v7().to_string()));

        store
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());

        Ok(doc)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> AdapterResult<u64> {
        let mut store = self.store.write();
        store.take_fault(Operation::DeleteMany, collection)?;

        let Some(docs) = store.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !matches(doc, filter));
        Ok((before - docs.len()) as u64)
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> AdapterResult<Vec<Value>> {
        let mut store = self.store.write();
        store.take_fault(Operation::FindMany, collection)?;

        Ok(store
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Filter,
    ) -> AdapterResult<u64> {
        let mut store = self.store.write();
        store.take_fault(Operation::UpdateMany, collection)?;

        let Some(docs) = store.collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut updated = 0;
        for doc in docs.iter_mut().filter(|doc| matches(doc, filter)) {
            if let Some(obj) = doc.as_object_mut() {
                for (field, value) in patch {
                    obj.insert(field.clone(), value.clone());
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn collections(&self) -> Option<&dyn CollectionManager> {
        if self.explicit_collections {
            Some(self)
        } else {
            None
        }
    }

    fn claims(&self) -> Option<&dyn ClaimStore> {
        Some(self)
    }
}

#[async_trait]
impl CollectionManager for MemoryAdapter {
    async fn create_collection(&self, name: &str) -> AdapterResult<()> {
        let mut store = self.store.write();
        store.take_fault(Operation::CreateCollection, name)?;
        store.collections.entry(name.to_string()).or_default();
        Ok(())
    }
}

#[async_trait]
impl ClaimStore for MemoryAdapter {
    async fn try_claim(&self, key: &str, owner: &str, ttl: Duration) -> AdapterResult<bool> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AdapterError::new(AdapterError::DATABASE_ERROR, e.to_string()))?;

        let mut store = self.store.write();
        let held_elsewhere = store
            .claims
            .get(key)
            .is_some_and(|existing| existing.owner != owner && existing.expires_at > now);
        if held_elsewhere {
            return Ok(false);
        }

        store.claims.insert(
            key.to_string(),
            Claim {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> AdapterResult<bool> {
        let mut store = self.store.write();
        match store.claims.get(key) {
            Some(claim) if claim.owner == owner => {
                store.claims.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
