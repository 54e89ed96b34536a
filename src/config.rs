//! Server configuration.
//!
//! Settings come from an optional TOML file; command line flags are applied
//! on top by the binary.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

pub const DEFAULT_STORAGE: &str = "mongo:localhost:27017:dnsfilter";
pub const DEFAULT_PORT: u16 = 10053;
pub const FALLBACK_UPSTREAM: &str = "8.8.8.8:53";
const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Where audit records go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuditTarget {
    #[default]
    Off,
    /// The `request_log` table of the configured storage.
    Store,
    File(PathBuf),
}

impl FromStr for AuditTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "off" => Ok(Self::Off),
            "store" => Ok(Self::Store),
            _ => match s.strip_prefix("file:") {
                Some(path) if !path.is_empty() => Ok(Self::File(PathBuf::from(path))),
                _ => Err(Error::Config(format!(
                    "audit log must be 'off', 'store' or 'file:<path>', got '{}'",
                    s
                ))),
            },
        }
    }
}

impl fmt::Display for AuditTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::Store => f.write_str("store"),
            Self::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

impl Serialize for AuditTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AuditTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Protocol used to reach the upstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamProtocol {
    #[default]
    Udp,
    Tcp,
}

/// Everything `serve` needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub addr: IpAddr,

    pub port: u16,

    /// Upstream server as `host:port`; the first system nameserver if unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    pub upstream_protocol: UpstreamProtocol,

    /// Storage descriptor for devices, audit records and the default whitelist
    pub storage: String,

    /// Whitelist descriptor; the `trusted_sites` table of `storage` if unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<String>,

    /// Only filter devices flagged `is_filtered`
    pub device_acl: bool,

    pub audit_log: AuditTarget,

    /// Upstream timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Seconds between stats log lines; 0 disables them
    pub stats_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            upstream: None,
            upstream_protocol: UpstreamProtocol::default(),
            storage: DEFAULT_STORAGE.to_string(),
            whitelist: None,
            device_acl: false,
            audit_log: AuditTarget::default(),
            timeout_secs: None,
            stats_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.is_empty() {
            return Err(Error::Config("storage descriptor must not be empty".into()));
        }
        if self.timeout_secs == Some(0) {
            return Err(Error::Config("timeout must be at least one second".into()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    /// Descriptor the whitelist is loaded from.
    pub fn whitelist_descriptor(&self) -> &str {
        self.whitelist.as_deref().unwrap_or(&self.storage)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// The configured upstream, else the system nameserver, else a public one.
    pub fn upstream_or_system(&self) -> String {
        if let Some(upstream) = &self.upstream {
            return upstream.clone();
        }
        std::fs::read_to_string(RESOLV_CONF)
            .ok()
            .and_then(|content| first_nameserver(&content))
            .map(|ip| SocketAddr::new(ip, 53).to_string())
            .unwrap_or_else(|| FALLBACK_UPSTREAM.to_string())
    }
}

/// First usable `nameserver` line of a resolv.conf.
fn first_nameserver(content: &str) -> Option<IpAddr> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| line.strip_prefix("nameserver"))
        .filter_map(|rest| rest.trim().parse::<IpAddr>().ok())
        .find(|ip| !ip.is_loopback())
}
