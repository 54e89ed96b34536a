//! In-memory storage backend.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{Properties, Store, StoreObject};
use crate::error::{Error, Result};

/// In-memory table. Clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<BTreeMap<String, Properties>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned<E: std::fmt::Display>(e: E) -> Error {
        Error::backend(format!("lock poisoned: {}", e))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create(&self, name: &str, properties: Properties) -> Result<()> {
        let mut guard = self.records.write().map_err(Self::poisoned)?;
        if guard.contains_key(name) {
            return Err(Error::DuplicateKey(name.to_string()));
        }
        guard.insert(name.to_string(), StoreObject::new(name, properties).properties);
        Ok(())
    }

    async fn create_if_absent(&self, name: &str, properties: Properties) -> Result<bool> {
        let mut guard = self.records.write().map_err(Self::poisoned)?;
        if guard.contains_key(name) {
            return Ok(false);
        }
        guard.insert(name.to_string(), StoreObject::new(name, properties).properties);
        Ok(true)
    }

    async fn read(&self, name: &str) -> Result<Option<StoreObject>> {
        let guard = self.records.read().map_err(Self::poisoned)?;
        Ok(guard
            .get(name)
            .map(|props| StoreObject::new(name, props.clone())))
    }

    async fn update(&self, name: &str, properties: Properties) -> Result<()> {
        let mut guard = self.records.write().map_err(Self::poisoned)?;
        let existing = guard
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        existing.extend(StoreObject::new(name, properties).properties);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut guard = self.records.write().map_err(Self::poisoned)?;
        guard
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn find(&self, criteria: &Properties) -> Result<Vec<StoreObject>> {
        let guard = self.records.read().map_err(Self::poisoned)?;
        Ok(guard
            .iter()
            .map(|(name, props)| StoreObject::new(name.as_str(), props.clone()))
            .filter(|obj| obj.matches(criteria))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_contract() {
        crate::storage::tests::check_store_contract(Arc::new(MemoryStore::new())).await;
    }

    #[tokio::test]
    async fn clones_share_records() {
        let store = MemoryStore::new();
        let clone = store.clone();

        store.create("example.com", Properties::new()).await.unwrap();

        assert!(clone.read("example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_create_if_absent_inserts_once() {
        let store = MemoryStore::new();

        let attempts = (0..16).map(|_| store.create_if_absent("1.2.3.4", Properties::new()));
        let results = futures::future::join_all(attempts).await;

        let inserted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(inserted, 1);
        assert_eq!(store.find(&Properties::new()).await.unwrap().len(), 1);
    }
}
