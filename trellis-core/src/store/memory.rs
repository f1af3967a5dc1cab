//! In-memory store.
//!
//! This is the reference implementation of `Store`. Live records and their
//! history sit in HashMaps behind a single `RwLock`, so each call is atomic
//! per store.
//!
//! ## Limitations
//!
//! - **Process-local**: nothing survives the process.
//! - **No cross-store atomicity**: a `MemoryDb` is just a set of
//!   independent tables.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use super::{Record, Store, StoreFactory};
use crate::error::{Error, Result};
use crate::graph::Address;

// ============================================================================
// MemoryStore
// ============================================================================

/// One in-memory table keyed by a fixed set of primary-key fields.
pub struct MemoryStore {
    pk: Vec<String>,
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    live: HashMap<Address, Record>,
    /// address → soft-deleted versions, in deletion order
    history: HashMap<Address, Vec<Record>>,
}

impl MemoryStore {
    pub fn new<I, S>(pk: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pk: Vec<String> = pk.into_iter().map(Into::into).collect();
        pk.sort();
        pk.dedup();
        Self {
            pk,
            inner: RwLock::new(MemoryInner::default()),
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.inner.read().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_key(&self, key: &Address) -> Result<()> {
        if key.fields().eq(self.pk.iter().map(String::as_str)) {
            Ok(())
        } else {
            Err(Error::Store(format!(
                "key {key} does not match primary key {:?}",
                self.pk
            )))
        }
    }
}

impl Store for MemoryStore {
    fn pk(&self) -> &[String] {
        &self.pk
    }

    fn find_one(&self, key: &Address) -> Result<Record> {
        self.inner
            .read()
            .live
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(key))
    }

    fn upsert(&self, mut record: Record) -> Result<Record> {
        self.check_key(&record.key)?;
        record.deleted = None;

        let mut inner = self.inner.write();
        if let Some(mut previous) = inner.live.insert(record.key.clone(), record.clone()) {
            previous.deleted = Some(Utc::now());
            trace!(key = %record.key, "previous version soft-deleted");
            inner
                .history
                .entry(record.key.clone())
                .or_default()
                .push(previous);
        }
        Ok(record)
    }

    fn read_as_of(&self, key: &Address, cutoff: Option<DateTime<Utc>>) -> Result<Option<Record>> {
        let inner = self.inner.read();
        let Some(cutoff) = cutoff else {
            return Ok(inner.live.get(key).cloned());
        };

        let historical = inner
            .history
            .get(key)
            .into_iter()
            .flatten()
            .filter(|r| r.deleted.is_some_and(|d| d >= cutoff))
            .min_by_key(|r| r.deleted);

        let candidate = match historical {
            Some(record) => Some(record),
            None => inner.live.get(key),
        };
        Ok(candidate.filter(|r| r.updated <= cutoff).cloned())
    }

    fn delete(&self, key: &Address) -> Result<Option<Record>> {
        let mut inner = self.inner.write();
        let Some(mut record) = inner.live.remove(key) else {
            return Ok(None);
        };
        record.deleted = Some(Utc::now());
        inner
            .history
            .entry(key.clone())
            .or_default()
            .push(record.clone());
        Ok(Some(record))
    }

    fn history(&self, key: &Address) -> Result<Vec<Record>> {
        let inner = self.inner.read();
        let mut versions: Vec<Record> = inner.history.get(key).cloned().unwrap_or_default();
        versions.extend(inner.live.get(key).cloned());
        Ok(versions)
    }

    fn drop_all(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.live.clear();
        inner.history.clear();
        Ok(())
    }
}

// ============================================================================
// MemoryDb
// ============================================================================

/// A named collection of in-memory tables.
#[derive(Clone, Default)]
pub struct MemoryDb {
    tables: Arc<DashMap<String, Arc<MemoryStore>>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store factory for the named table.
    pub fn table(&self, name: impl Into<String>) -> Arc<MemoryTable> {
        Arc::new(MemoryTable {
            name: name.into(),
            tables: Arc::clone(&self.tables),
        })
    }

    /// The table's store, if some cell already opened it.
    pub fn store(&self, name: &str) -> Option<Arc<MemoryStore>> {
        self.tables.get(name).map(|t| Arc::clone(t.value()))
    }

    /// Drop every table.
    pub fn drop_all(&self) {
        self.tables.clear();
    }
}

/// Factory opening one table of a [`MemoryDb`].
pub struct MemoryTable {
    name: String,
    tables: Arc<DashMap<String, Arc<MemoryStore>>>,
}

impl MemoryTable {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl StoreFactory for MemoryTable {
    fn open(&self, pk: &[String]) -> Result<Arc<dyn Store>> {
        let store = self
            .tables
            .entry(self.name.clone())
            .or_insert_with(|| Arc::new(MemoryStore::new(pk.iter().cloned())))
            .value()
            .clone();

        let mut requested: Vec<&str> = pk.iter().map(String::as_str).collect();
        requested.sort();
        requested.dedup();
        if !store.pk.iter().map(String::as_str).eq(requested) {
            return Err(Error::Store(format!(
                "table `{}` is keyed by {:?}, not {:?}",
                self.name, store.pk, pk
            )));
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use indexmap::IndexMap;
    use serde_json::json;

    fn record(key: &str, value: i64, updated: DateTime<Utc>) -> Record {
        Record {
            key: Address::from_pairs([("key", json!(key))]),
            args: IndexMap::new(),
            results: IndexMap::from([("data".to_string(), json!(value))]),
            updated,
            deleted: None,
        }
    }

    #[test]
    fn find_one_reports_missing_keys() {
        let store = MemoryStore::new(["key"]);
        let key = Address::from_pairs([("key", json!("x"))]);
        assert!(matches!(store.find_one(&key), Err(Error::NotFound(_))));
    }

    #[test]
    fn upsert_keeps_history() {
        let store = MemoryStore::new(["key"]);
        let t0 = Utc::now() - Duration::hours(2);
        store.upsert(record("x", 1, t0)).unwrap();
        store.upsert(record("x", 2, t0 + Duration::hours(1))).unwrap();

        let key = Address::from_pairs([("key", json!("x"))]);
        assert_eq!(store.find_one(&key).unwrap().results["data"], json!(2));

        let versions = store.history(&key).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].results["data"], json!(1));
        assert!(versions[0].deleted.is_some());
        assert!(versions[1].is_live());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn as_of_reads_walk_versions() {
        let store = MemoryStore::new(["key"]);
        let key = Address::from_pairs([("key", json!("x"))]);
        let t0 = Utc::now() - Duration::hours(2);

        store.upsert(record("x", 1, t0)).unwrap();
        let between = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.upsert(record("x", 2, Utc::now())).unwrap();

        let live = store.read_as_of(&key, None).unwrap().unwrap();
        assert_eq!(live.results["data"], json!(2));

        let past = store.read_as_of(&key, Some(between)).unwrap().unwrap();
        assert_eq!(past.results["data"], json!(1));

        let now = store.read_as_of(&key, Some(Utc::now())).unwrap().unwrap();
        assert_eq!(now.results["data"], json!(2));

        let before_anything = t0 - Duration::hours(1);
        assert!(store.read_as_of(&key, Some(before_anything)).unwrap().is_none());
    }

    #[test]
    fn delete_is_soft() {
        let store = MemoryStore::new(["key"]);
        let key = Address::from_pairs([("key", json!("x"))]);
        store.upsert(record("x", 1, Utc::now())).unwrap();

        let cutoff = Utc::now();
        let deleted = store.delete(&key).unwrap().unwrap();
        assert!(deleted.deleted.is_some());
        assert!(store.read_as_of(&key, None).unwrap().is_none());
        assert_eq!(
            store.read_as_of(&key, Some(cutoff)).unwrap().unwrap().results["data"],
            json!(1)
        );
        assert!(store.delete(&key).unwrap().is_none());
    }

    #[test]
    fn mismatched_keys_are_rejected() {
        let store = MemoryStore::new(["id"]);
        assert!(matches!(
            store.upsert(record("x", 1, Utc::now())),
            Err(Error::Store(_))
        ));
    }

    #[test]
    fn drop_all_forgets_history() {
        let store = MemoryStore::new(["key"]);
        let key = Address::from_pairs([("key", json!("x"))]);
        store.upsert(record("x", 1, Utc::now())).unwrap();
        store.upsert(record("x", 2, Utc::now())).unwrap();

        store.drop_all().unwrap();
        assert!(store.is_empty());
        assert!(store.history(&key).unwrap().is_empty());
    }

    #[test]
    fn tables_are_shared_and_keyed() {
        let db = MemoryDb::new();
        let table = db.table("prices");
        let pk = vec!["key".to_string()];

        let one = table.open(&pk).unwrap();
        one.upsert(record("x", 1, Utc::now())).unwrap();
        assert_eq!(db.store("prices").unwrap().len(), 1);

        let again = db.table("prices").open(&pk).unwrap();
        let key = Address::from_pairs([("key", json!("x"))]);
        assert!(again.find_one(&key).is_ok());

        assert!(matches!(
            table.open(&["other".to_string()]),
            Err(Error::Store(_))
        ));

        db.drop_all();
        assert!(db.store("prices").is_none());
    }
}
