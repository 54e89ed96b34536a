//! Query resolution.
//!
//! Transports hand parsed queries to a [`Resolver`]. The [`FilteringResolver`]
//! runs the filter chain first and only forwards accepted queries upstream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::dns::Query;
use crate::error::ResolveError;
use crate::filter::{Filter, FilterChain, Verdict};
use crate::stats::Stats;

/// A raw DNS response message.
pub type Answer = Vec<u8>;

/// Anything that can answer a DNS query.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn query(
        &self,
        query: &Query,
        timeout: Option<Duration>,
    ) -> Result<Answer, ResolveError>;
}

/// Applies a filter chain in front of an upstream resolver.
pub struct FilteringResolver {
    upstream: Arc<dyn Resolver>,
    chain: FilterChain,
    stats: Stats,
}

impl FilteringResolver {
    pub fn new(upstream: Arc<dyn Resolver>, chain: FilterChain) -> Self {
        Self {
            upstream,
            chain,
            stats: Stats::new(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

#[async_trait]
impl Resolver for FilteringResolver {
    async fn query(
        &self,
        query: &Query,
        timeout: Option<Duration>,
    ) -> Result<Answer, ResolveError> {
        let start = Instant::now();

        match self.chain.do_filter(query).await {
            // The chain's output only decides; the client's own query is sent.
            Ok(Verdict::Accept(_)) => {}
            Ok(Verdict::Reject(rejection)) => {
                warn!(
                    filter = %rejection.filter,
                    name = %query.name,
                    device = %query.client,
                    "query rejected"
                );
                self.stats.record_rejected(start.elapsed());
                return Err(ResolveError::Rejected {
                    filter: rejection.filter,
                    name: query.name.clone(),
                    reason: rejection.reason,
                });
            }
            Err(e) => {
                error!(name = %query.name, device = %query.client, error = %e, "filter chain failed");
                self.stats.record_filter_error(start.elapsed());
                return Err(ResolveError::Filter(e));
            }
        }

        match self.upstream.query(query, timeout).await {
            Ok(answer) => {
                debug!(
                    name = %query.name,
                    elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "forwarded"
                );
                self.stats.record_forwarded(start.elapsed());
                Ok(answer)
            }
            Err(e) => {
                self.stats.record_upstream_error(start.elapsed());
                Err(e)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingUpstream;
    use super::*;
    use crate::dns::TYPE_A;
    use crate::error::Error;
    use crate::filter::testing::{Behaviour, RenamingFilter, StubFilter};
    use crate::filter::{DeviceAclFilter, WhitelistFilter};
    use crate::storage::{MemoryStore, Properties, Store};
    use crate::whitelist::ListWhitelist;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};

    fn query(name: &str) -> Query {
        Query::build(77, name, TYPE_A, IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1))).unwrap()
    }

    fn whitelist_chain(entries: &[&str]) -> FilterChain {
        let whitelist = ListWhitelist::from_entries(entries.iter().copied());
        FilterChain::default().with(WhitelistFilter::new(Arc::new(whitelist)))
    }

    #[tokio::test]
    async fn accepted_query_is_forwarded_with_timeout() {
        let upstream = Arc::new(RecordingUpstream::default());
        let resolver = FilteringResolver::new(upstream.clone(), whitelist_chain(&["ok.com"]));
        let timeout = Some(Duration::from_secs(3));

        let answer = resolver.query(&query("www.ok.com"), timeout).await.unwrap();

        assert_eq!(answer, query("www.ok.com").packet.to_vec());
        let seen = upstream.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![("www.ok.com".to_string(), timeout)]);
    }

    #[tokio::test]
    async fn rejected_query_never_reaches_upstream() {
        let upstream = Arc::new(RecordingUpstream::default());
        let resolver = FilteringResolver::new(upstream.clone(), whitelist_chain(&["ok.com"]));

        let err = resolver.query(&query("bad.com"), None).await.unwrap_err();

        match err {
            ResolveError::Rejected { filter, name, .. } => {
                assert_eq!(filter, "whitelist");
                assert_eq!(name, "bad.com");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(upstream.names().is_empty());
        assert_eq!(resolver.stats().snapshot_and_reset().rejected, 1);
    }

    #[tokio::test]
    async fn chain_error_fails_closed() {
        let upstream = Arc::new(RecordingUpstream::default());
        let chain = FilterChain::default().with(StubFilter::new("down", Behaviour::Fail));
        let resolver = FilteringResolver::new(upstream.clone(), chain);

        let err = resolver.query(&query("ok.com"), None).await.unwrap_err();

        assert!(matches!(err, ResolveError::Filter(Error::BackendUnavailable(_))));
        assert!(!err.is_rejection());
        assert!(upstream.names().is_empty());
        assert_eq!(resolver.stats().snapshot_and_reset().filter_errors, 1);
    }

    #[tokio::test]
    async fn original_query_is_forwarded_not_filter_output() {
        let upstream = Arc::new(RecordingUpstream::default());
        let resolver =
            FilteringResolver::new(upstream.clone(), FilterChain::default().with(RenamingFilter));

        resolver.query(&query("example.com"), None).await.unwrap();

        assert_eq!(upstream.names(), vec!["example.com".to_string()]);
    }

    #[tokio::test]
    async fn upstream_failure_is_returned_and_counted() {
        let upstream = Arc::new(RecordingUpstream::failing());
        let resolver = FilteringResolver::new(upstream, FilterChain::default());

        let err = resolver.query(&query("example.com"), None).await.unwrap_err();

        assert!(matches!(err, ResolveError::Upstream(_)));
        let stats = resolver.stats().snapshot_and_reset();
        assert_eq!(stats.upstream_errors, 1);
        assert_eq!(stats.forwarded, 0);
    }

    #[tokio::test]
    async fn device_acl_pipeline_end_to_end() {
        let devices = MemoryStore::new();
        let upstream = Arc::new(RecordingUpstream::default());
        let chain = FilterChain::default().with(DeviceAclFilter::new(
            Arc::new(devices.clone()),
            whitelist_chain(&["ok.com"]),
        ));
        let resolver = FilteringResolver::new(upstream.clone(), chain);

        // First contact registers the device unfiltered.
        resolver.query(&query("bad.com"), None).await.unwrap();

        let mut props = Properties::new();
        props.insert("is_filtered".into(), json!(true));
        devices.update("10.1.1.1", props).await.unwrap();

        let rejected = resolver.query(&query("bad.com"), None).await;
        let allowed = resolver.query(&query("api.ok.com"), None).await;

        assert!(rejected.unwrap_err().is_rejection());
        assert!(allowed.is_ok());
        assert_eq!(upstream.names(), vec!["bad.com", "api.ok.com"]);
    }
}
