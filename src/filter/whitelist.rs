//! Whitelist filter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Filter, Verdict};
use crate::dns::Query;
use crate::error::Result;
use crate::whitelist::{self, Whitelist};

/// Only allows queries for whitelisted domains and their subdomains.
pub struct WhitelistFilter {
    whitelist: Arc<dyn Whitelist>,
}

impl WhitelistFilter {
    pub fn new(whitelist: Arc<dyn Whitelist>) -> Self {
        Self { whitelist }
    }
}

#[async_trait]
impl Filter for WhitelistFilter {
    fn name(&self) -> &str {
        "whitelist"
    }

    async fn do_filter(&self, query: &Query) -> Result<Verdict> {
        if whitelist::permits(self.whitelist.as_ref(), &query.name).await? {
            return Ok(Verdict::Accept(query.clone()));
        }

        debug!(
            name = %query.name,
            whitelist = %self.whitelist.describe(),
            "rejected host, not in whitelist"
        );
        Ok(Verdict::reject(self.name(), "not in whitelist"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::TYPE_A;
    use crate::error::Error;
    use crate::whitelist::ListWhitelist;
    use std::net::{IpAddr, Ipv4Addr};

    fn query(name: &str) -> Query {
        Query::build(9, name, TYPE_A, IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap()
    }

    fn filter(entries: &[&str]) -> WhitelistFilter {
        WhitelistFilter::new(Arc::new(ListWhitelist::from_entries(entries.iter().copied())))
    }

    #[tokio::test]
    async fn passes_whitelisted_suffixes_unchanged() {
        let filter = filter(&["example.com"]);

        for name in ["example.com", "www.example.com", "a.b.example.com"] {
            let verdict = filter.do_filter(&query(name)).await.unwrap();
            let passed = verdict.into_query().expect(name);
            assert_eq!(passed.name, name);
            assert_eq!(passed.packet, query(name).packet);
        }
    }

    #[tokio::test]
    async fn entries_match_case_as_sent() {
        let filter = filter(&["Example.com"]);
        let mut packet = vec![0, 9, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
        packet.extend_from_slice(b"\x07Example\x03com\x00");
        packet.extend_from_slice(&[0, 1, 0, 1]);
        let wire = Query::parse(&packet, IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();

        assert_eq!(wire.name, "Example.com");
        assert!(filter.do_filter(&wire).await.unwrap().is_accept());
        assert!(filter.do_filter(&query("www.Example.com")).await.unwrap().is_accept());
        assert!(!filter.do_filter(&query("example.com")).await.unwrap().is_accept());
    }

    #[tokio::test]
    async fn rejects_everything_else() {
        let filter = filter(&["example.com"]);

        for name in ["example.com.evil.org", "badexample.com", "com", "evil.org"] {
            let verdict = filter.do_filter(&query(name)).await.unwrap();
            assert!(!verdict.is_accept(), "{} should be rejected", name);
        }
    }

    #[tokio::test]
    async fn rejection_names_the_filter() {
        let filter = filter(&[]);

        match filter.do_filter(&query("bad.com")).await.unwrap() {
            Verdict::Reject(rejection) => assert_eq!(rejection.filter, "whitelist"),
            Verdict::Accept(_) => panic!("expected rejection"),
        }
    }

    struct DownWhitelist;

    #[async_trait]
    impl Whitelist for DownWhitelist {
        async fn contains(&self, _entry: &str) -> Result<bool> {
            Err(Error::backend("connection refused"))
        }
        async fn get_all(&self) -> Result<Vec<String>> {
            Err(Error::backend("connection refused"))
        }
        async fn add(&self, _entry: &str) -> Result<()> {
            Err(Error::backend("connection refused"))
        }
        async fn delete(&self, _entry: &str) -> Result<()> {
            Err(Error::backend("connection refused"))
        }
        fn describe(&self) -> String {
            "down".into()
        }
    }

    #[tokio::test]
    async fn backend_failure_is_an_error_not_a_rejection() {
        let filter = WhitelistFilter::new(Arc::new(DownWhitelist));

        let result = filter.do_filter(&query("example.com")).await;

        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
    }
}
