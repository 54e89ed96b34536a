//! Store-backed whitelist.

use std::sync::Arc;

use async_trait::async_trait;

use super::Whitelist;
use crate::error::Result;
use crate::storage::{Properties, Store};

/// A whitelist whose entries are records of a [`Store`]; presence means trusted.
///
/// Nothing is cached: every call is a fresh backend round trip.
pub struct StoreWhitelist {
    store: Arc<dyn Store>,
    descriptor: String,
}

impl StoreWhitelist {
    pub fn new(store: Arc<dyn Store>, descriptor: impl Into<String>) -> Self {
        Self {
            store,
            descriptor: descriptor.into(),
        }
    }
}

#[async_trait]
impl Whitelist for StoreWhitelist {
    async fn contains(&self, entry: &str) -> Result<bool> {
        Ok(self.store.read(entry).await?.is_some())
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        let records = self.store.find(&Properties::new()).await?;
        Ok(records.into_iter().map(|obj| obj.name).collect())
    }

    /// Fails with `DuplicateKey` if the entry is already present.
    async fn add(&self, entry: &str) -> Result<()> {
        self.store.create(entry, Properties::new()).await
    }

    async fn delete(&self, entry: &str) -> Result<()> {
        self.store.delete(entry).await
    }

    fn describe(&self) -> String {
        self.descriptor.clone()
    }
}
