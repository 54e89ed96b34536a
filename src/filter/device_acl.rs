//! Per-device opt-in filtering.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Filter, FilterChain, Verdict};
use crate::dns::Query;
use crate::error::Result;
use crate::records::Device;
use crate::storage::Store;

/// Gates a sub-chain on the querying device's `is_filtered` flag.
///
/// Unknown devices are registered on first contact with filtering off and
/// their queries pass. Devices flagged `is_filtered` get the sub-chain's
/// verdict; all others pass untouched.
pub struct DeviceAclFilter {
    devices: Arc<dyn Store>,
    chain: FilterChain,
}

impl DeviceAclFilter {
    pub fn new(devices: Arc<dyn Store>, chain: FilterChain) -> Self {
        Self { devices, chain }
    }

    /// Look up the device, registering it if unseen.
    async fn device_for(&self, addr: &str) -> Result<Device> {
        if let Some(obj) = self.devices.read(addr).await? {
            return Device::from_object(&obj);
        }

        let device = Device::auto_registered(addr);
        if self
            .devices
            .create_if_absent(addr, device.to_properties()?)
            .await?
        {
            info!(device = addr, "registered new device");
            return Ok(device);
        }

        // Someone registered it between our read and insert; theirs wins.
        match self.devices.read(addr).await? {
            Some(obj) => Device::from_object(&obj),
            None => Ok(device),
        }
    }
}

#[async_trait]
impl Filter for DeviceAclFilter {
    fn name(&self) -> &str {
        "device-acl"
    }

    async fn do_filter(&self, query: &Query) -> Result<Verdict> {
        let addr = query.device_addr();
        let device = self.device_for(&addr).await?;

        if !device.is_filtered {
            debug!(device = %addr, name = %query.name, "device not filtered");
            return Ok(Verdict::Accept(query.clone()));
        }

        self.chain.do_filter(query).await
    }
}
