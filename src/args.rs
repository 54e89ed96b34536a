//! Command-line argument parsing

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use dnsfilter::config::DEFAULT_STORAGE;

/// DNS proxy that only resolves whitelisted domains
#[derive(Parser, Debug)]
#[command(name = "dnsfilter")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Log at DEBUG level
    #[arg(long, global = true, env = "DNSFILTER_DEBUG", conflicts_with = "quiet")]
    pub debug: bool,

    /// Only log errors
    #[arg(short, long, global = true, env = "DNSFILTER_QUIET")]
    pub quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "FILE", env = "DNSFILTER_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Output format for logs
    #[arg(long, global = true, value_enum, default_value = "text", env = "DNSFILTER_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Storage descriptor for devices, sites and the request log
    /// [default: mongo:localhost:27017:dnsfilter]
    #[arg(long, global = true, value_name = "DESC", env = "DNSFILTER_STORAGE_URL")]
    pub storage_url: Option<String>,
}

impl Args {
    /// The storage descriptor given on the command line, or the default.
    pub fn storage(&self) -> &str {
        self.storage_url.as_deref().unwrap_or(DEFAULT_STORAGE)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// Compact format
    Compact,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the DNS server
    Serve(ServeArgs),

    /// Manage trusted sites
    Sites {
        #[command(subcommand)]
        action: SitesAction,
    },

    /// Manage known devices
    Devices {
        #[command(subcommand)]
        action: DevicesAction,
    },

    /// Show logged queries, optionally for one device
    Logs {
        /// Device address
        device: Option<String>,
    },
}

#[derive(ClapArgs, Debug, Default)]
pub struct ServeArgs {
    /// TOML configuration file; flags override its values
    #[arg(short, long, value_name = "FILE", env = "DNSFILTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, value_name = "ADDR", env = "DNSFILTER_ADDR")]
    pub addr: Option<IpAddr>,

    /// Port to listen on (UDP and TCP)
    #[arg(short, long, env = "DNSFILTER_PORT")]
    pub port: Option<u16>,

    /// Upstream DNS server (host:port); defaults to the system nameserver
    #[arg(short, long, value_name = "HOST:PORT", env = "DNSFILTER_UPSTREAM")]
    pub upstream: Option<String>,

    /// Talk to the upstream over TCP instead of UDP
    #[arg(long, env = "DNSFILTER_UPSTREAM_TCP")]
    pub upstream_tcp: bool,

    /// Whitelist descriptor (file:, dir: or a storage descriptor)
    #[arg(short, long, value_name = "DESC", env = "DNSFILTER_WHITELIST")]
    pub whitelist: Option<String>,

    /// Only filter devices flagged for filtering
    #[arg(long, env = "DNSFILTER_DEVICE_ACL")]
    pub device_acl: bool,

    /// Audit log target: off, store or file:PATH
    #[arg(long, value_name = "TARGET", env = "DNSFILTER_AUDIT_LOG")]
    pub audit_log: Option<String>,

    /// Upstream timeout in seconds
    #[arg(long, value_name = "SECS", env = "DNSFILTER_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Seconds between stats log lines (0 disables)
    #[arg(long, value_name = "SECS", env = "DNSFILTER_STATS_INTERVAL")]
    pub stats_interval: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum SitesAction {
    /// Add sites to the whitelist
    Add {
        #[arg(required = true)]
        sites: Vec<String>,
        #[command(flatten)]
        target: WhitelistTarget,
    },
    /// Remove sites from the whitelist
    Delete {
        #[arg(required = true)]
        sites: Vec<String>,
        #[command(flatten)]
        target: WhitelistTarget,
    },
    /// Print the given sites that are trusted, or all of them
    Get {
        sites: Vec<String>,
        #[command(flatten)]
        target: WhitelistTarget,
    },
    /// Copy every entry of one whitelist into another
    Copy {
        #[arg(long, value_name = "DESC")]
        from: String,
        #[arg(long, value_name = "DESC")]
        to: String,
    },
}

#[derive(ClapArgs, Debug)]
pub struct WhitelistTarget {
    /// Whitelist descriptor; the storage's trusted sites if unset
    #[arg(short, long, value_name = "DESC", env = "DNSFILTER_WHITELIST")]
    pub whitelist: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum DevicesAction {
    /// Register devices (unfiltered)
    Add {
        #[arg(required = true)]
        addrs: Vec<String>,
    },
    /// Forget devices
    Delete {
        #[arg(required = true)]
        addrs: Vec<String>,
    },
    /// Print the given devices, or all of them
    Get {
        addrs: Vec<String>,
        /// Only devices with filtering turned on or off
        #[arg(long, value_enum)]
        filtered: Option<Toggle>,
    },
    /// Set a device's display name
    Rename { addr: String, name: String },
    /// Turn whitelist filtering on or off for a device
    Filter { addr: String, state: Toggle },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}
