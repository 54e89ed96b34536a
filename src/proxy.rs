//! DNS proxy orchestration.
//!
//! Builds the filter chain and upstream from a [`ServerConfig`], binds the
//! transports and runs until the process exits.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{AuditTarget, ServerConfig, UpstreamProtocol};
use crate::error::{Error, Result};
use crate::filter::{
    AuditLogFilter, AuditSink, DeviceAclFilter, FileAuditSink, FilterChain, StoreAuditSink,
    WhitelistFilter,
};
use crate::records::{KNOWN_DEVICES, REQUEST_LOG};
use crate::resolver::{FilteringResolver, Resolver};
use crate::storage::StorePool;
use crate::transport::{TransportOptions, tcp::TcpTransport, udp::UdpTransport};
use crate::upstream::{TcpUpstream, UdpUpstream};
use crate::whitelist::{self, Whitelist};

/// Assemble the filter chain described by `config`.
///
/// Without the device ACL every query goes through
/// `[audit?, whitelist]`; with it that chain only applies to devices
/// flagged `is_filtered`.
pub async fn build_chain(config: &ServerConfig, pool: &StorePool) -> Result<FilterChain> {
    let whitelist = whitelist::load(config.whitelist_descriptor(), pool).await?;
    info!(whitelist = %whitelist.describe(), "loaded whitelist");

    let mut chain = FilterChain::default();
    if let Some(sink) = audit_sink(&config.audit_log, &config.storage, pool).await? {
        chain = chain.with(AuditLogFilter::new(sink));
    }
    chain = chain.with(WhitelistFilter::new(whitelist));

    if !config.device_acl {
        return Ok(chain);
    }

    let devices = pool.open(&config.storage, KNOWN_DEVICES).await?;
    Ok(FilterChain::default().with(DeviceAclFilter::new(devices, chain)))
}

async fn audit_sink(
    target: &AuditTarget,
    storage: &str,
    pool: &StorePool,
) -> Result<Option<Arc<dyn AuditSink>>> {
    let sink: Arc<dyn AuditSink> = match target {
        AuditTarget::Off => return Ok(None),
        AuditTarget::Store => Arc::new(StoreAuditSink::new(pool.open(storage, REQUEST_LOG).await?)),
        AuditTarget::File(path) => Arc::new(FileAuditSink::open(path).await?),
    };
    Ok(Some(sink))
}

/// Resolve the configured upstream to a forwarder.
pub async fn build_upstream(config: &ServerConfig) -> Result<Arc<dyn Resolver>> {
    let upstream = config.upstream_or_system();
    let addr = tokio::net::lookup_host(upstream.as_str())
        .await
        .map_err(|e| Error::Config(format!("cannot resolve upstream '{}': {}", upstream, e)))?
        .next()
        .ok_or_else(|| Error::Config(format!("upstream '{}' has no address", upstream)))?;

    info!(%addr, protocol = ?config.upstream_protocol, "forwarding to upstream");
    Ok(match config.upstream_protocol {
        UpstreamProtocol::Udp => Arc::new(UdpUpstream::new(addr)),
        UpstreamProtocol::Tcp => Arc::new(TcpUpstream::new(addr)),
    })
}

/// Run the DNS proxy with the given configuration.
///
/// Must be called inside a `LocalSet`. Runs indefinitely.
pub async fn run(config: ServerConfig) -> Result<()> {
    let pool = StorePool::new();
    let chain = build_chain(&config, &pool).await?;
    let upstream = build_upstream(&config).await?;
    let resolver = Arc::new(FilteringResolver::new(upstream, chain));

    let options = TransportOptions {
        timeout: config.timeout(),
    };
    let udp = UdpTransport::bind(config.bind_addr()).await?;
    let tcp = TcpTransport::bind(config.bind_addr()).await?;

    udp.start(resolver.clone(), options);
    tcp.start(resolver.clone(), options);

    info!(
        addr = %config.bind_addr(),
        device_acl = config.device_acl,
        audit_log = %config.audit_log,
        "DNS proxy started"
    );

    match config.stats_interval() {
        Some(period) => log_stats(&resolver, period).await,
        None => std::future::pending::<()>().await,
    }

    Ok(())
}

async fn log_stats(resolver: &FilteringResolver, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip first immediate tick
    loop {
        interval.tick().await;
        let stats = resolver.stats().snapshot_and_reset();
        info!(
            uptime_secs = stats.uptime_secs,
            requests = stats.requests,
            forwarded = stats.forwarded,
            rejected = stats.rejected,
            filter_errors = stats.filter_errors,
            upstream_errors = stats.upstream_errors,
            avg_response_ms = format_args!("{:.2}", stats.avg_response_ms),
            "stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Query, TYPE_A};
    use crate::filter::{Filter, Verdict};
    use crate::records::{Device, TRUSTED_SITES};
    use crate::storage::{Properties, Store};
    use serde_json::json;
    use std::net::IpAddr;

    fn query_from(addr: &str, name: &str) -> Query {
        let client: IpAddr = addr.parse().unwrap();
        Query::build(8, name, TYPE_A, client).unwrap()
    }

    async fn seeded_config(pool: &StorePool, label: &str) -> ServerConfig {
        let storage = format!("memory:{}", label);
        let sites = pool.open(&storage, TRUSTED_SITES).await.unwrap();
        sites.create("ok.com", Properties::new()).await.unwrap();
        ServerConfig {
            storage,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn plain_chain_filters_everyone() {
        let pool = StorePool::new();
        let config = seeded_config(&pool, "plain").await;

        let chain = build_chain(&config, &pool).await.unwrap();

        assert_eq!(chain.len(), 1);
        assert!(chain.do_filter(&query_from("10.0.0.1", "www.ok.com")).await.unwrap().is_accept());
        assert!(!chain.do_filter(&query_from("10.0.0.1", "bad.com")).await.unwrap().is_accept());
    }

    #[tokio::test]
    async fn device_acl_chain_with_store_audit() {
        let pool = StorePool::new();
        let config = ServerConfig {
            device_acl: true,
            audit_log: AuditTarget::Store,
            ..seeded_config(&pool, "acl").await
        };

        let chain = build_chain(&config, &pool).await.unwrap();
        let devices = pool.open(&config.storage, KNOWN_DEVICES).await.unwrap();
        let log = pool.open(&config.storage, REQUEST_LOG).await.unwrap();

        // Unknown device: registered, unfiltered, not audited.
        let verdict = chain.do_filter(&query_from("10.0.0.2", "bad.com")).await.unwrap();
        assert!(verdict.is_accept());
        let device = Device::from_object(&devices.read("10.0.0.2").await.unwrap().unwrap()).unwrap();
        assert!(!device.is_filtered);
        assert!(log.find(&Properties::new()).await.unwrap().is_empty());

        let mut props = Properties::new();
        props.insert("is_filtered".into(), json!(true));
        devices.update("10.0.0.2", props).await.unwrap();

        let verdict = chain.do_filter(&query_from("10.0.0.2", "bad.com")).await.unwrap();
        assert!(matches!(verdict, Verdict::Reject(ref r) if r.filter == "whitelist"));
        assert_eq!(log.find(&Properties::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_whitelist_and_file_audit() {
        let tmp = tempfile::tempdir().unwrap();
        let list = tmp.path().join("whitelist.conf");
        std::fs::write(&list, "# trusted\nexample.org\n").unwrap();
        let audit = tmp.path().join("queries.log");
        let pool = StorePool::new();
        let config = ServerConfig {
            storage: "memory:files".into(),
            whitelist: Some(format!("file:{}", list.display())),
            audit_log: AuditTarget::File(audit.clone()),
            ..ServerConfig::default()
        };

        let chain = build_chain(&config, &pool).await.unwrap();

        assert_eq!(chain.len(), 2);
        assert!(chain.do_filter(&query_from("10.0.0.3", "a.example.org")).await.unwrap().is_accept());
        assert!(std::fs::read_to_string(&audit).unwrap().contains("a.example.org"));
    }

    #[tokio::test]
    async fn unsupported_whitelist_backend_is_fatal() {
        let pool = StorePool::new();
        let config = ServerConfig {
            whitelist: Some("redis:localhost".into()),
            ..ServerConfig::default()
        };

        let result = build_chain(&config, &pool).await;

        assert!(matches!(result, Err(Error::UnsupportedBackend { .. })));
    }

    #[tokio::test]
    async fn upstream_literal_address_resolves() {
        let config = ServerConfig {
            upstream: Some("127.0.0.1:5300".into()),
            upstream_protocol: UpstreamProtocol::Tcp,
            ..ServerConfig::default()
        };

        assert!(build_upstream(&config).await.is_ok());
    }
}
