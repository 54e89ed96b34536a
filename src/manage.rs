//! Administration of devices, trusted sites and the request log.
//!
//! These wrap the same stores the server reads, so changes take effect on the
//! next query without a restart (except for file and directory whitelists,
//! which the server only reads at start-up).

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::records::{AuditRecord, Device, KNOWN_DEVICES, REQUEST_LOG};
use crate::storage::{Properties, Store, StorePool};
use crate::whitelist::Whitelist;

/// `user@host` of whoever runs the command, for `added_by`.
pub fn current_user() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}@{}", user, host)
}

/// The `known_devices` table.
pub struct Devices {
    store: Arc<dyn Store>,
}

impl Devices {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn open(pool: &StorePool, storage: &str) -> Result<Self> {
        Ok(Self::new(pool.open(storage, KNOWN_DEVICES).await?))
    }

    /// Register a device, unfiltered. Returns `false` if it already exists.
    pub async fn add(&self, addr: &str, added_by: &str) -> Result<bool> {
        let device = Device::unidentified(addr, added_by);
        match self.store.create(addr, device.to_properties()?).await {
            Ok(()) => {
                info!(device = addr, "added device");
                Ok(true)
            }
            Err(Error::DuplicateKey(_)) => {
                warn!(device = addr, "device already known");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Forget a device. Returns `false` if it was not known.
    pub async fn remove(&self, addr: &str) -> Result<bool> {
        let removed = ignore_missing(self.store.delete(addr).await)?;
        if removed {
            info!(device = addr, "deleted device");
        } else {
            warn!(device = addr, "device not known");
        }
        Ok(removed)
    }

    /// The named devices that exist, or every device when `addrs` is empty.
    pub async fn get(&self, addrs: &[String]) -> Result<Vec<Device>> {
        if addrs.is_empty() {
            return self.find(&Properties::new()).await;
        }

        let mut devices = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match self.store.read(addr).await? {
                Some(obj) => devices.push(Device::from_object(&obj)?),
                None => debug!(device = %addr, "device not found"),
            }
        }
        Ok(devices)
    }

    /// Devices whose properties match every entry of `criteria`.
    pub async fn find(&self, criteria: &Properties) -> Result<Vec<Device>> {
        self.store
            .find(criteria)
            .await?
            .iter()
            .map(Device::from_object)
            .collect()
    }

    /// Devices with filtering turned on (`true`) or off (`false`).
    pub async fn filtered(&self, on: bool) -> Result<Vec<Device>> {
        let mut criteria = Properties::new();
        criteria.insert("is_filtered".into(), json!(on));
        self.find(&criteria).await
    }

    /// Set the display name. Returns `false` if the device is unknown.
    pub async fn rename(&self, addr: &str, display_name: &str) -> Result<bool> {
        self.set(addr, "display_name", json!(display_name)).await
    }

    /// Turn whitelist filtering on or off. Returns `false` if the device is unknown.
    pub async fn set_filtered(&self, addr: &str, on: bool) -> Result<bool> {
        self.set(addr, "is_filtered", json!(on)).await
    }

    async fn set(&self, addr: &str, prop: &str, value: Value) -> Result<bool> {
        let mut props = Properties::new();
        props.insert(prop.to_string(), value);

        let updated = ignore_missing(self.store.update(addr, props).await)?;
        if updated {
            info!(device = addr, prop, "updated device");
        } else {
            warn!(device = addr, "device not found");
        }
        Ok(updated)
    }
}

/// Trusted sites of one whitelist.
pub struct Sites {
    whitelist: Arc<dyn Whitelist>,
}

impl Sites {
    pub fn new(whitelist: Arc<dyn Whitelist>) -> Self {
        Self { whitelist }
    }

    /// Returns `false` if the site was already trusted.
    pub async fn add(&self, site: &str) -> Result<bool> {
        if self.whitelist.contains(site).await? {
            info!(site, "site already in whitelist");
            return Ok(false);
        }
        match self.whitelist.add(site).await {
            Ok(()) => {
                info!(site, "added site");
                Ok(true)
            }
            // Lost a race with another writer; the site is trusted either way.
            Err(Error::DuplicateKey(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns `false` if the site was not trusted.
    pub async fn remove(&self, site: &str) -> Result<bool> {
        let removed = ignore_missing(self.whitelist.delete(site).await)?;
        if removed {
            info!(site, "deleted site");
        } else {
            info!(site, "site is not in whitelist");
        }
        Ok(removed)
    }

    /// The given sites that are trusted, or every trusted site when empty.
    pub async fn get(&self, sites: &[String]) -> Result<Vec<String>> {
        if sites.is_empty() {
            return self.whitelist.get_all().await;
        }

        let mut found = Vec::new();
        for site in sites {
            if self.whitelist.contains(site).await? {
                found.push(site.clone());
            }
        }
        Ok(found)
    }
}

/// The `request_log` table.
pub struct RequestLog {
    store: Arc<dyn Store>,
}

impl RequestLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn open(pool: &StorePool, storage: &str) -> Result<Self> {
        Ok(Self::new(pool.open(storage, REQUEST_LOG).await?))
    }

    /// Logged queries, oldest first, optionally for one device only.
    pub async fn find(&self, device: Option<&str>) -> Result<Vec<AuditRecord>> {
        let mut criteria = Properties::new();
        if let Some(addr) = device {
            criteria.insert("device_addr".into(), json!(addr));
        }

        let mut records = self
            .store
            .find(&criteria)
            .await?
            .iter()
            .map(AuditRecord::from_object)
            .collect::<Result<Vec<_>>>()?;
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(records)
    }
}

fn ignore_missing(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(Error::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
