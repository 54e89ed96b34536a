//! Typed records persisted through the [`Store`](crate::storage::Store) property bag.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::storage::{Properties, StoreObject};

/// Table holding [`Device`] records keyed by address.
pub const KNOWN_DEVICES: &str = "known_devices";
/// Table holding whitelisted sites; record presence alone signals membership.
pub const TRUSTED_SITES: &str = "trusted_sites";
/// Table holding [`AuditRecord`]s.
pub const REQUEST_LOG: &str = "request_log";

/// `added_by` tag of devices registered by the device ACL on first contact.
pub const AUTO_REGISTRATION: &str = "auto-registration";

/// A client device, keyed by its network address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub display_name: String,
    pub device_addr: String,
    pub date_added: DateTime<Utc>,
    pub is_filtered: bool,
    pub added_by: String,
}

impl Device {
    /// A new, unfiltered device with a placeholder display name.
    pub fn unidentified(addr: impl Into<String>, added_by: impl Into<String>) -> Self {
        let device_addr = addr.into();
        Self {
            display_name: format!("{} (unidentified device)", device_addr),
            device_addr,
            date_added: Utc::now(),
            is_filtered: false,
            added_by: added_by.into(),
        }
    }

    /// The record the device ACL creates for an address it has never seen.
    pub fn auto_registered(addr: impl Into<String>) -> Self {
        Self::unidentified(addr, AUTO_REGISTRATION)
    }

    /// Store key of this device.
    pub fn name(&self) -> &str {
        &self.device_addr
    }

    pub fn to_properties(&self) -> Result<Properties> {
        to_properties(self.name(), self)
    }

    pub fn from_object(obj: &StoreObject) -> Result<Self> {
        from_object(obj)
    }
}

/// One logged query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub query_name: String,
    pub device_addr: String,
}

impl AuditRecord {
    pub fn now(query_name: impl Into<String>, device_addr: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            query_name: query_name.into(),
            device_addr: device_addr.into(),
        }
    }

    pub fn to_properties(&self) -> Result<Properties> {
        to_properties(&self.query_name, self)
    }

    pub fn from_object(obj: &StoreObject) -> Result<Self> {
        from_object(obj)
    }
}

fn to_properties<T: Serialize>(name: &str, record: &T) -> Result<Properties> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::invalid_record(
            name,
            format!("expected an object, got {}", other),
        )),
        Err(e) => Err(Error::invalid_record(name, e)),
    }
}

fn from_object<T: DeserializeOwned>(obj: &StoreObject) -> Result<T> {
    serde_json::from_value(Value::Object(obj.properties.clone()))
        .map_err(|e| Error::invalid_record(&obj.name, e))
}
