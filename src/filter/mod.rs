//! DNS query filtering.
//!
//! Filters decide whether a query may be resolved. They are composed into a
//! [`FilterChain`] built once at start-up:
//!
//! ```text
//! DeviceAclFilter ──(device is_filtered)──▶ [AuditLogFilter, WhitelistFilter]
//! ```

mod audit;
mod device_acl;
mod whitelist;

pub use audit::{AuditLogFilter, AuditSink, FileAuditSink, StoreAuditSink};
pub use device_acl::DeviceAclFilter;
pub use whitelist::WhitelistFilter;

use async_trait::async_trait;
use tracing::debug;

use crate::dns::Query;
use crate::error::Result;

/// A deliberate refusal by a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Name of the filter that refused the query.
    pub filter: String,
    pub reason: String,
}

/// Outcome of running a filter.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Pass this (possibly unchanged) query downstream.
    Accept(Query),
    Reject(Rejection),
}

impl Verdict {
    pub fn reject(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Reject(Rejection {
            filter: filter.into(),
            reason: reason.into(),
        })
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_))
    }

    pub fn into_query(self) -> Option<Query> {
        match self {
            Self::Accept(query) => Some(query),
            Self::Reject(_) => None,
        }
    }
}

/// A query filter.
///
/// An `Err` means the filter could not decide (backend down, bad record) and
/// is kept apart from a [`Verdict::Reject`].
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    async fn do_filter(&self, query: &Query) -> Result<Verdict>;
}

/// An ordered collection of filters.
///
/// Every filter sees the original query, not the previous filter's output.
/// The first rejection or error stops the chain; otherwise the last filter's
/// output is returned.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Append a filter to the end of the chain.
    pub fn with(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[async_trait]
impl Filter for FilterChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn do_filter(&self, query: &Query) -> Result<Verdict> {
        let mut verdict = Verdict::Accept(query.clone());

        for filter in &self.filters {
            verdict = filter.do_filter(query).await?;

            if let Verdict::Reject(rejection) = &verdict {
                debug!(
                    filter = %rejection.filter,
                    name = %query.name,
                    "filter chain broken"
                );
                return Ok(verdict);
            }
        }

        Ok(verdict)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Behaviour, RenamingFilter, StubFilter};
    use super::*;
    use crate::dns::{Query, TYPE_A};
    use crate::error::Error;
    use std::net::{IpAddr, Ipv4Addr};

    fn query(name: &str) -> Query {
        Query::build(1, name, TYPE_A, IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))).unwrap()
    }

    #[tokio::test]
    async fn empty_chain_accepts_unchanged() {
        let verdict = FilterChain::default().do_filter(&query("example.com")).await.unwrap();

        assert_eq!(verdict.into_query().unwrap().name, "example.com");
    }

    #[tokio::test]
    async fn chain_short_circuits_on_rejection() {
        let first = StubFilter::new("first", Behaviour::Accept);
        let second = StubFilter::new("second", Behaviour::Reject);
        let third = StubFilter::new("third", Behaviour::Accept);
        let counts = [first.calls.clone(), second.calls.clone(), third.calls.clone()];

        let chain = FilterChain::default().with(first).with(second).with(third);
        let verdict = chain.do_filter(&query("example.com")).await.unwrap();

        match verdict {
            Verdict::Reject(rejection) => assert_eq!(rejection.filter, "second"),
            Verdict::Accept(_) => panic!("expected rejection"),
        }
        let calls: Vec<usize> = counts.iter().map(StubFilter::call_count).collect();
        assert_eq!(calls, vec![1, 1, 0]);
    }

    #[tokio::test]
    async fn chain_propagates_errors_and_stops() {
        let failing = StubFilter::new("failing", Behaviour::Fail);
        let after = StubFilter::new("after", Behaviour::Accept);
        let after_calls = after.calls.clone();

        let chain = FilterChain::default().with(failing).with(after);
        let result = chain.do_filter(&query("example.com")).await;

        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
        assert_eq!(StubFilter::call_count(&after_calls), 0);
    }

    #[tokio::test]
    async fn each_filter_sees_original_query() {
        let chain = FilterChain::default()
            .with(RenamingFilter)
            .with(RenamingFilter);

        let verdict = chain.do_filter(&query("example.com")).await.unwrap();

        // The second filter renamed the original, not the first filter's output.
        assert_eq!(verdict.into_query().unwrap().name, "renamed.example.com");
    }

    #[tokio::test]
    async fn chain_returns_last_output() {
        let chain = FilterChain::default()
            .with(StubFilter::new("accept", Behaviour::Accept))
            .with(RenamingFilter);

        let verdict = chain.do_filter(&query("example.com")).await.unwrap();

        assert!(verdict.is_accept());
        assert_eq!(verdict.into_query().unwrap().name, "renamed.example.com");
    }
}
