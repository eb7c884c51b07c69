use dashmap::DashMap;
use std::sync::Arc;

use crate::store::{LinkStore, StoreResult};

/// Thread-safe in-memory cache mapping short_code -> original_url.
///
/// Warmed on startup from every stored link, then filled on allocation and on
/// redirect lookups that had to go to the store. Links are never edited or
/// deleted, so entries never go stale.
#[derive(Clone, Debug, Default)]
pub struct LinkCache {
    inner: Arc<DashMap<String, String>>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every stored link. Returns how many entries were added.
    pub async fn warm(&self, store: &dyn LinkStore) -> StoreResult<usize> {
        let links = store.all_links().await?;
        let count = links.len();
        for link in links {
            self.set(link.short_code, link.original_url);
        }

        tracing::info!("Cache warmed with {} link(s)", count);
        Ok(count)
    }

    /// Insert or update a mapping.
    pub fn set(&self, short_code: impl Into<String>, original_url: impl Into<String>) {
        self.inner.insert(short_code.into(), original_url.into());
    }

    /// Look up a short code. Returns a clone of the original URL if present.
    pub fn get(&self, short_code: &str) -> Option<String> {
        self.inner.get(short_code).map(|v| v.clone())
    }
}
