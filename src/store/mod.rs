//! Persistence seam for the two collections the service owns: `links` and
//! `clicks`. Backends implement both traits.

pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub mod flaky;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::StoreError,
    models::{ClickEvent, Link, NewClick, NewLink},
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait LinkStore: Send + Sync + 'static {
    /// Insert a new link. Fails with [`StoreError::Conflict`] if the short
    /// code is already taken.
    async fn insert_link(&self, link: NewLink) -> StoreResult<Link>;

    /// Fetch a link by its short code.
    async fn find_by_code(&self, short_code: &str) -> StoreResult<Option<Link>>;

    /// All links owned by `owner_id`, newest first.
    async fn links_for_owner(&self, owner_id: &str) -> StoreResult<Vec<Link>>;

    /// Atomically add one to `total_clicks` and set `last_clicked_at`.
    /// Returns `false` when no link has that code.
    async fn increment_clicks(&self, short_code: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Every link, used to warm the redirect cache.
    async fn all_links(&self) -> StoreResult<Vec<Link>>;
}

#[async_trait]
pub trait ClickStore: Send + Sync + 'static {
    /// Append one click event.
    async fn append_click(&self, click: NewClick) -> StoreResult<ClickEvent>;

    /// Clicks for a code, newest first. Needs the `(short_code, timestamp)`
    /// index and fails with [`StoreError::MissingIndex`] without it.
    async fn clicks_for_code_ordered(&self, short_code: &str) -> StoreResult<Vec<ClickEvent>>;

    /// Clicks for a code in whatever order the store returns them.
    async fn clicks_for_code(&self, short_code: &str) -> StoreResult<Vec<ClickEvent>>;
}
