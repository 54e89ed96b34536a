//! dnsfilter - a DNS proxy that only resolves whitelisted domains.
//!
//! Queries pass through a [`filter::FilterChain`] (optionally gated per
//! device) before being forwarded upstream. Whitelists, devices and the
//! request log live behind the [`storage::Store`] abstraction.

pub mod config;
pub mod dns;
pub mod error;
pub mod filter;
pub mod manage;
pub mod proxy;
pub mod records;
pub mod resolver;
pub mod stats;
pub mod storage;
pub mod transport;
pub mod upstream;
pub mod whitelist;
