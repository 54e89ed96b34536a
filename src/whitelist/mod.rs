//! Whitelists of trusted domains.
//!
//! A whitelist is either a static list read once from a file or directory, or
//! a live view over the `trusted_sites` store where every call round-trips to
//! the backend.

mod list;
mod store;

pub use list::ListWhitelist;
pub use store::StoreWhitelist;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::records::TRUSTED_SITES;
use crate::storage::{StoreDescriptor, StorePool};

/// A mutable set of domain/site names.
#[async_trait]
pub trait Whitelist: Send + Sync {
    /// Exact membership test; no suffix matching.
    async fn contains(&self, entry: &str) -> Result<bool>;

    async fn get_all(&self) -> Result<Vec<String>>;

    async fn add(&self, entry: &str) -> Result<()>;

    async fn delete(&self, entry: &str) -> Result<()>;

    /// Short description used in log lines.
    fn describe(&self) -> String;
}

/// Load the whitelist named by `descriptor`.
///
/// `file:` and `dir:` load static lists; any storage descriptor gives a
/// store-backed whitelist over the `trusted_sites` table.
pub async fn load(descriptor: &str, pool: &StorePool) -> Result<Arc<dyn Whitelist>> {
    if let Some(path) = descriptor.strip_prefix("file:") {
        return Ok(Arc::new(ListWhitelist::from_file(Path::new(path)).await?));
    }
    if let Some(path) = descriptor.strip_prefix("dir:") {
        return Ok(Arc::new(ListWhitelist::from_dir(Path::new(path)).await?));
    }

    let parsed = StoreDescriptor::parse(descriptor)?;
    let store = pool.open_parsed(&parsed, TRUSTED_SITES).await?;
    Ok(Arc::new(StoreWhitelist::new(store, descriptor)))
}

/// Names to test for a suffix match, most specific first.
///
/// Yields the full name, then each suffix obtained by dropping leading labels,
/// down to the last two labels. A bare top-level label is only yielded when
/// it is the whole name. A trailing root dot is ignored.
pub fn match_candidates(name: &str) -> impl Iterator<Item = &str> {
    let name = name.strip_suffix('.').unwrap_or(name);
    let mut next = Some(name);

    std::iter::from_fn(move || {
        let current = next?;
        next = match current.find('.') {
            Some(pos) if current[pos + 1..].contains('.') => Some(&current[pos + 1..]),
            _ => None,
        };
        Some(current)
    })
}

/// Whether `name` or any of its suffixes is whitelisted. Stops at the first hit.
pub async fn permits(whitelist: &dyn Whitelist, name: &str) -> Result<bool> {
    for candidate in match_candidates(name) {
        if whitelist.contains(candidate).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Add every entry of `src` missing from `dst`. Returns how many were added.
pub async fn copy_entries(src: &dyn Whitelist, dst: &dyn Whitelist) -> Result<usize> {
    let mut added = 0;
    for entry in src.get_all().await? {
        if !dst.contains(&entry).await? {
            dst.add(&entry).await?;
            added += 1;
        }
    }
    Ok(added)
}
