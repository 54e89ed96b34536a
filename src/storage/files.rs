//! Directory-of-files storage backend.
//!
//! Each record is a JSON document `<dir>/<encoded name>.json` holding the
//! record key under `name` plus its properties. Writes go to a temporary file
//! first and are then linked or renamed into place, so readers never observe a
//! partially written record. Updates and deletes are serialised within one
//! process; two processes updating the same directory can still lose writes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{NAME_FIELD, Properties, Store, StoreObject};
use crate::error::{Error, Result};

const RECORD_EXTENSION: &str = "json";

/// A table stored as one JSON file per record.
pub struct FileStore {
    dir: PathBuf,
    /// Held across read-merge-rename and delete.
    writes: Mutex<()>,
}

impl FileStore {
    /// Open the table directory, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(Error::backend)?;
        debug!(dir = %dir.display(), "opened file store");
        Ok(Self {
            dir,
            writes: Mutex::new(()),
        })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_name(name), RECORD_EXTENSION))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!(
            ".{}.{}.tmp",
            encode_name(name),
            uuid::Uuid::new_v4().simple()
        ))
    }

    async fn write_temp(&self, name: &str, properties: Properties) -> Result<PathBuf> {
        let mut document = StoreObject::new(name, properties).properties;
        document.insert(NAME_FIELD.to_string(), Value::String(name.to_string()));

        let bytes = serde_json::to_vec_pretty(&Value::Object(document))
            .map_err(|e| Error::invalid_record(name, e))?;
        let temp = self.temp_path(name);
        fs::write(&temp, bytes).await.map_err(Error::backend)?;
        Ok(temp)
    }

    /// Link a fully written temp file to the record path if it is free.
    async fn insert(&self, name: &str, properties: Properties) -> Result<bool> {
        let temp = self.write_temp(name, properties).await?;
        let linked = fs::hard_link(&temp, self.record_path(name)).await;
        remove_quietly(&temp).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::backend(e)),
        }
    }

    async fn load(&self, path: &Path) -> Result<Option<StoreObject>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::backend(e)),
        };

        let label = path.display().to_string();
        let document: Properties =
            serde_json::from_slice(&bytes).map_err(|e| Error::invalid_record(&label, e))?;
        let name = document
            .get(NAME_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_record(&label, "missing 'name' field"))?
            .to_string();

        Ok(Some(StoreObject::new(name, document)))
    }
}

#[async_trait]
impl Store for FileStore {
    async fn create(&self, name: &str, properties: Properties) -> Result<()> {
        if self.insert(name, properties).await? {
            Ok(())
        } else {
            Err(Error::DuplicateKey(name.to_string()))
        }
    }

    async fn create_if_absent(&self, name: &str, properties: Properties) -> Result<bool> {
        self.insert(name, properties).await
    }

    async fn read(&self, name: &str) -> Result<Option<StoreObject>> {
        self.load(&self.record_path(name)).await
    }

    async fn update(&self, name: &str, properties: Properties) -> Result<()> {
        let _guard = self.writes.lock().await;
        let Some(mut existing) = self.read(name).await? else {
            warn!(name, "failed to update missing record");
            return Err(Error::NotFound(name.to_string()));
        };

        existing
            .properties
            .extend(StoreObject::new(name, properties).properties);
        let temp = self.write_temp(name, existing.properties).await?;
        if let Err(e) = fs::rename(&temp, self.record_path(name)).await {
            remove_quietly(&temp).await;
            return Err(Error::backend(e));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.writes.lock().await;
        match fs::remove_file(self.record_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(name.to_string())),
            Err(e) => Err(Error::backend(e)),
        }
    }

    async fn find(&self, criteria: &Properties) -> Result<Vec<StoreObject>> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(Error::backend)?;
        let mut results = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(Error::backend)? {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }

            if let Some(obj) = self.load(&path).await? {
                if obj.matches(criteria) {
                    results.push(obj);
                }
            }
        }

        results.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = results.len(), dir = %self.dir.display(), "found records");
        Ok(results)
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "failed to remove temp file");
    }
}

/// Percent-encode a record name for use as a file name.
///
/// A leading dot is encoded too, keeping records apart from temp files.
fn encode_name(name: &str) -> String {
    let encoded = urlencoding::encode(name);
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded.into_owned(),
    }
}
