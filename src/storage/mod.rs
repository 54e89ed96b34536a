//! Storage backends for dnsfilter.
//!
//! This module provides the [`Store`] trait and its implementations:
//! - [`MemoryStore`] - process-local tables, mostly for tests and demos
//! - [`FileStore`] - one JSON document per record in a directory
//! - [`MongoStore`] - a MongoDB collection per table
//!
//! Stores are opened through a [`StorePool`] from a `scheme:parameters`
//! descriptor. The pool shares one client per database endpoint across every
//! store it hands out.

mod files;
mod memory;
mod mongo;

pub use files::FileStore;
pub use memory::MemoryStore;
pub use mongo::MongoStore;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Open-ended property bag of a stored record.
///
/// Three record shapes (devices, trusted sites, request logs) share the store,
/// so the store itself only deals in JSON objects. Typed records in
/// [`crate::records`] convert through this type.
pub type Properties = serde_json::Map<String, Value>;

/// Field holding the record key inside persisted documents.
pub(crate) const NAME_FIELD: &str = "name";
/// Backend-internal identifier, never exposed to callers.
pub(crate) const ID_FIELD: &str = "_id";

/// A named record as seen by callers of a [`Store`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreObject {
    pub name: String,
    pub properties: Properties,
}

impl StoreObject {
    /// Build an object, dropping the key and any backend identifier from the
    /// property set.
    pub fn new(name: impl Into<String>, mut properties: Properties) -> Self {
        properties.remove(ID_FIELD);
        properties.remove(NAME_FIELD);
        Self {
            name: name.into(),
            properties,
        }
    }

    pub fn get(&self, prop: &str) -> Option<&Value> {
        self.properties.get(prop)
    }

    pub fn set(&mut self, prop: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(prop.into(), value.into());
    }

    /// Simple equality match; a `name` criterion matches the record key.
    pub fn matches(&self, criteria: &Properties) -> bool {
        criteria.iter().all(|(field, expected)| {
            if field == NAME_FIELD {
                expected.as_str() == Some(self.name.as_str())
            } else {
                self.properties.get(field) == Some(expected)
            }
        })
    }
}

/// Key-addressed CRUD over named records.
///
/// Policies shared by every backend:
/// - `create` fails with [`Error::DuplicateKey`] if the name exists
/// - `update` and `delete` fail with [`Error::NotFound`] if it does not
/// - `read` reports absence as `Ok(None)`
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new record.
    async fn create(&self, name: &str, properties: Properties) -> Result<()>;

    /// Insert the record only if no record with this name exists.
    ///
    /// Returns `true` if this call inserted it. Concurrent callers racing on
    /// the same name see exactly one `true`.
    async fn create_if_absent(&self, name: &str, properties: Properties) -> Result<bool>;

    async fn read(&self, name: &str) -> Result<Option<StoreObject>>;

    /// Merge `properties` over the existing record.
    async fn update(&self, name: &str, properties: Properties) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// All records matching every field of `criteria`; empty criteria matches all.
    async fn find(&self, criteria: &Properties) -> Result<Vec<StoreObject>>;
}

/// A parsed storage descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreDescriptor {
    /// `memory:<label>`
    Memory { label: String },
    /// `files:<directory>`
    Files { dir: PathBuf },
    /// `mongo:<host>:<port>:<database>[:<collection>]`
    Mongo {
        host: String,
        port: u16,
        database: String,
        collection: Option<String>,
    },
}

impl StoreDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let (scheme, rest) = descriptor
            .split_once(':')
            .ok_or_else(|| Error::invalid_descriptor(descriptor, "expected 'scheme:parameters'"))?;

        match scheme {
            "memory" => Ok(Self::Memory {
                label: rest.to_string(),
            }),
            "files" => {
                if rest.is_empty() {
                    return Err(Error::invalid_descriptor(descriptor, "missing directory"));
                }
                Ok(Self::Files {
                    dir: PathBuf::from(rest),
                })
            }
            "mongo" => {
                let parts: Vec<&str> = rest.split(':').collect();
                let (host, port, database, collection) = match parts.as_slice() {
                    [host, port, database] => (host, port, database, None),
                    [host, port, database, collection] => {
                        (host, port, database, Some(collection.to_string()))
                    }
                    _ => {
                        return Err(Error::invalid_descriptor(
                            descriptor,
                            "expected mongo:host:port:database[:collection]",
                        ));
                    }
                };
                let port = port
                    .parse()
                    .map_err(|_| Error::invalid_descriptor(descriptor, "invalid port"))?;
                if host.is_empty() || database.is_empty() {
                    return Err(Error::invalid_descriptor(descriptor, "empty host or database"));
                }
                Ok(Self::Mongo {
                    host: host.to_string(),
                    port,
                    database: database.to_string(),
                    collection,
                })
            }
            other => Err(Error::unsupported(other, descriptor)),
        }
    }
}

/// Shared backend connections, owned by the process.
///
/// Created once at start-up and passed by reference to whatever needs to open
/// stores. Stores addressing the same endpoint reuse one client.
#[derive(Default)]
pub struct StorePool {
    mongo_clients: Mutex<FxHashMap<(String, u16), mongodb::Client>>,
    memory_tables: Mutex<FxHashMap<(String, String), MemoryStore>>,
}

impl StorePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the `table` store on the backend named by `descriptor`.
    pub async fn open(&self, descriptor: &str, table: &str) -> Result<Arc<dyn Store>> {
        let parsed = StoreDescriptor::parse(descriptor)?;
        self.open_parsed(&parsed, table).await
    }

    pub async fn open_parsed(
        &self,
        descriptor: &StoreDescriptor,
        table: &str,
    ) -> Result<Arc<dyn Store>> {
        match descriptor {
            StoreDescriptor::Memory { label } => Ok(Arc::new(self.memory_table(label, table)?)),
            StoreDescriptor::Files { dir } => {
                let store = FileStore::open(dir.join(table)).await?;
                Ok(Arc::new(store))
            }
            StoreDescriptor::Mongo {
                host,
                port,
                database,
                collection,
            } => {
                let client = self.mongo_client(host, *port)?;
                let collection = collection.as_deref().unwrap_or(table);
                let store = MongoStore::open(&client, database, collection).await?;
                Ok(Arc::new(store))
            }
        }
    }

    fn memory_table(&self, label: &str, table: &str) -> Result<MemoryStore> {
        let mut tables = self
            .memory_tables
            .lock()
            .map_err(|e| Error::backend(format!("lock poisoned: {}", e)))?;
        let store = tables
            .entry((label.to_string(), table.to_string()))
            .or_default();
        Ok(store.clone())
    }

    fn mongo_client(&self, host: &str, port: u16) -> Result<mongodb::Client> {
        let mut clients = self
            .mongo_clients
            .lock()
            .map_err(|e| Error::backend(format!("lock poisoned: {}", e)))?;

        let key = (host.to_string(), port);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        debug!(host, port, "connecting to mongodb");
        let client = mongo::connect(host, port)?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Number of distinct database clients held by the pool.
    pub fn client_count(&self) -> usize {
        self.mongo_clients.lock().map(|c| c.len()).unwrap_or(0)
    }
}
