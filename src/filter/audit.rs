//! Query audit logging.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::{Filter, Verdict};
use crate::dns::Query;
use crate::error::Result;
use crate::records::AuditRecord;
use crate::storage::Store;

/// Destination of audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditRecord) -> Result<()>;
}

/// Writes audit records into the `request_log` store.
pub struct StoreAuditSink {
    store: Arc<dyn Store>,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn record(&self, entry: &AuditRecord) -> Result<()> {
        let name = uuid::Uuid::new_v4().to_string();
        self.store.create(&name, entry.to_properties()?).await
    }
}

/// Appends one line per query to a text file:
/// `[<timestamp>] <device> <name>`.
pub struct FileAuditSink {
    file: Mutex<File>,
}

impl FileAuditSink {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn record(&self, entry: &AuditRecord) -> Result<()> {
        let line = format!(
            "[{}] {} {}\n",
            entry.timestamp.to_rfc3339(),
            entry.device_addr,
            entry.query_name
        );
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Records every query it sees and always accepts it unchanged.
///
/// A failing sink is logged; it never turns into a rejection or an error.
pub struct AuditLogFilter {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogFilter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Filter for AuditLogFilter {
    fn name(&self) -> &str {
        "audit-log"
    }

    async fn do_filter(&self, query: &Query) -> Result<Verdict> {
        debug!(name = %query.name, device = %query.client, "logging query");
        let entry = AuditRecord::now(query.name.as_str(), query.device_addr());

        if let Err(e) = self.sink.record(&entry).await {
            error!(name = %query.name, error = %e, "failed to record query");
        }
        Ok(Verdict::Accept(query.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::TYPE_A;
    use crate::error::Error;
    use crate::storage::{MemoryStore, Properties};
    use std::net::{IpAddr, Ipv4Addr};

    fn query(name: &str) -> Query {
        Query::build(3, name, TYPE_A, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))).unwrap()
    }

    #[tokio::test]
    async fn records_to_store_and_passes() {
        let store = MemoryStore::new();
        let filter = AuditLogFilter::new(Arc::new(StoreAuditSink::new(Arc::new(store.clone()))));

        let verdict = filter.do_filter(&query("example.com")).await.unwrap();

        assert_eq!(verdict.into_query().unwrap().name, "example.com");
        let records = store.find(&Properties::new()).await.unwrap();
        assert_eq!(records.len(), 1);
        let record = AuditRecord::from_object(&records[0]).unwrap();
        assert_eq!(record.query_name, "example.com");
        assert_eq!(record.device_addr, "10.0.0.5");
    }

    #[tokio::test]
    async fn appends_lines_to_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queries.log");
        let filter = AuditLogFilter::new(Arc::new(FileAuditSink::open(&path).await.unwrap()));

        filter.do_filter(&query("a.com")).await.unwrap();
        filter.do_filter(&query("b.com")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("10.0.0.5 a.com"));
        assert!(lines[1].ends_with("10.0.0.5 b.com"));
    }

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn record(&self, _entry: &AuditRecord) -> Result<()> {
            Err(Error::backend("disk full"))
        }
    }

    #[tokio::test]
    async fn sink_failure_does_not_change_verdict() {
        let filter = AuditLogFilter::new(Arc::new(BrokenSink));

        let verdict = filter.do_filter(&query("example.com")).await.unwrap();

        assert!(verdict.is_accept());
    }
}
