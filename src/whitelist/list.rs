//! Static whitelists read from files.
//!
//! The list is loaded once at construction. `add` and `delete` only touch the
//! in-memory copy; nothing is written back to disk.

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::fs;
use tracing::debug;

use super::Whitelist;
use crate::error::{Error, Result};

/// Extension of the list files picked up from a whitelist directory.
const LIST_EXTENSION: &str = "conf";

#[derive(Default)]
struct Entries {
    /// Entries in insertion order, duplicates included.
    ordered: Vec<String>,
    /// Occurrence count per entry.
    counts: FxHashMap<String, usize>,
}

impl Entries {
    fn push(&mut self, entry: String) {
        *self.counts.entry(entry.clone()).or_default() += 1;
        self.ordered.push(entry);
    }

    /// Remove the first occurrence of `entry`.
    fn remove(&mut self, entry: &str) -> bool {
        let Some(pos) = self.ordered.iter().position(|e| e == entry) else {
            return false;
        };
        self.ordered.remove(pos);
        if let Some(count) = self.counts.get_mut(entry) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(entry);
            }
        }
        true
    }
}

/// A whitelist of domains from a file or a directory of `.conf` files.
pub struct ListWhitelist {
    source: String,
    entries: RwLock<Entries>,
}

impl ListWhitelist {
    /// Build a list from already parsed entries.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Entries::default();
        for entry in entries {
            list.push(entry.into());
        }
        Self {
            source: "inline".to_string(),
            entries: RwLock::new(list),
        }
    }

    /// Load a newline-delimited list.
    pub async fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading whitelist file");
        let content = fs::read_to_string(path).await?;

        let mut list = Self::from_entries(parse_list(&content));
        list.source = format!("file:{}", path.display());
        Ok(list)
    }

    /// Load every `*.conf` file in `dir`, in file-name order.
    pub async fn from_dir(dir: &Path) -> Result<Self> {
        debug!(dir = %dir.display(), "loading whitelist directory");
        let mut files = Vec::new();
        let mut read_dir = fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == LIST_EXTENSION) && path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut entries = Vec::new();
        for path in &files {
            debug!(path = %path.display(), "loading domains from whitelist file");
            let content = fs::read_to_string(path).await?;
            entries.extend(parse_list(&content));
        }

        let mut list = Self::from_entries(entries);
        list.source = format!("dir:{}", dir.display());
        Ok(list)
    }

    fn poisoned<E: std::fmt::Display>(e: E) -> Error {
        Error::backend(format!("lock poisoned: {}", e))
    }
}

#[async_trait]
impl Whitelist for ListWhitelist {
    async fn contains(&self, entry: &str) -> Result<bool> {
        let guard = self.entries.read().map_err(Self::poisoned)?;
        Ok(guard.counts.contains_key(entry))
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        let guard = self.entries.read().map_err(Self::poisoned)?;
        Ok(guard.ordered.clone())
    }

    async fn add(&self, entry: &str) -> Result<()> {
        let mut guard = self.entries.write().map_err(Self::poisoned)?;
        guard.push(entry.to_string());
        Ok(())
    }

    async fn delete(&self, entry: &str) -> Result<()> {
        let mut guard = self.entries.write().map_err(Self::poisoned)?;
        if guard.remove(entry) {
            Ok(())
        } else {
            Err(Error::NotFound(entry.to_string()))
        }
    }

    fn describe(&self) -> String {
        self.source.clone()
    }
}

/// Parse a list: one entry per line, blank lines and `#` comments skipped.
pub fn parse_list(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            Some(line.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blanks() {
        let content = "# trusted sites\nexample.com\n\n  github.com  \n#disabled.org\n";

        assert_eq!(parse_list(content), vec!["example.com", "github.com"]);
    }

    #[test]
    fn parse_keeps_case_and_duplicates() {
        let content = "Example.com\nexample.com\nexample.com\n";

        assert_eq!(
            parse_list(content),
            vec!["Example.com", "example.com", "example.com"]
        );
    }

    #[tokio::test]
    async fn contains_is_exact() {
        let whitelist = ListWhitelist::from_entries(["example.com"]);

        assert!(whitelist.contains("example.com").await.unwrap());
        assert!(!whitelist.contains("www.example.com").await.unwrap());
        assert!(!whitelist.contains("EXAMPLE.COM").await.unwrap());
    }

    #[tokio::test]
    async fn get_all_preserves_insertion_order() {
        let whitelist = ListWhitelist::from_entries(["b.com", "a.com"]);
        whitelist.add("c.com").await.unwrap();

        assert_eq!(whitelist.get_all().await.unwrap(), vec!["b.com", "a.com", "c.com"]);
    }

    #[tokio::test]
    async fn delete_removes_one_occurrence() {
        let whitelist = ListWhitelist::from_entries(["a.com", "a.com"]);

        whitelist.delete("a.com").await.unwrap();
        assert!(whitelist.contains("a.com").await.unwrap());

        whitelist.delete("a.com").await.unwrap();
        assert!(!whitelist.contains("a.com").await.unwrap());

        let err = whitelist.delete("a.com").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn from_dir_reads_conf_files_only() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.conf"), "b.com\n").unwrap();
        std::fs::write(tmp.path().join("a.conf"), "# a\na.com\n").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored.com\n").unwrap();

        let whitelist = ListWhitelist::from_dir(tmp.path()).await.unwrap();

        assert_eq!(whitelist.get_all().await.unwrap(), vec!["a.com", "b.com"]);
        assert!(!whitelist.contains("ignored.com").await.unwrap());
    }

    #[tokio::test]
    async fn mutations_are_not_written_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sites.conf");
        std::fs::write(&path, "example.com\n").unwrap();

        let whitelist = ListWhitelist::from_file(&path).await.unwrap();
        whitelist.add("new.com").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "example.com\n");
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let result = ListWhitelist::from_file(Path::new("/nonexistent/sites.conf")).await;

        assert!(matches!(result, Err(Error::Io(_))));
    }
}
