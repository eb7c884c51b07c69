//! Fault-injecting wrapper around [`MemoryStore`] for failure-path tests.

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ClickStore, LinkStore, MemoryStore, StoreResult};
use crate::{
    error::StoreError,
    models::{ClickEvent, Link, NewClick, NewLink},
};

#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_lookups: AtomicBool,
    pub fail_inserts: AtomicBool,
    pub fail_increments: AtomicBool,
    pub fail_appends: AtomicBool,
    pub fail_click_reads: AtomicBool,
    pub missing_index: AtomicBool,
    /// Report a conflict on this many inserts before letting them through.
    pub insert_conflicts: AtomicUsize,
    /// Every lookup claims the code is already taken.
    pub every_code_taken: AtomicBool,
    pub write_delay: Option<Duration>,
    pub lookups: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }

    async fn delay(&self) {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn tripped(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("injected failure".into())
}

#[async_trait]
impl LinkStore for FlakyStore {
    async fn insert_link(&self, link: NewLink) -> StoreResult<Link> {
        if tripped(&self.fail_inserts) {
            return Err(unavailable());
        }
        let pending = self.insert_conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.insert_conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict(link.short_code));
        }
        self.inner.insert_link(link).await
    }

    async fn find_by_code(&self, short_code: &str) -> StoreResult<Option<Link>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if tripped(&self.fail_lookups) {
            return Err(unavailable());
        }
        if tripped(&self.every_code_taken) {
            return Ok(Some(Link {
                id: 0,
                short_code: short_code.to_owned(),
                original_url: "https://taken.example".into(),
                owner_id: None,
                created_at: Utc::now(),
                total_clicks: 0,
                last_clicked_at: None,
            }));
        }
        self.inner.find_by_code(short_code).await
    }

    async fn links_for_owner(&self, owner_id: &str) -> StoreResult<Vec<Link>> {
        if tripped(&self.fail_lookups) {
            return Err(unavailable());
        }
        self.inner.links_for_owner(owner_id).await
    }

    async fn increment_clicks(&self, short_code: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        self.delay().await;
        if tripped(&self.fail_increments) {
            return Err(unavailable());
        }
        self.inner.increment_clicks(short_code, at).await
    }

    async fn all_links(&self) -> StoreResult<Vec<Link>> {
        self.inner.all_links().await
    }
}

#[async_trait]
impl ClickStore for FlakyStore {
    async fn append_click(&self, click: NewClick) -> StoreResult<ClickEvent> {
        self.delay().await;
        if tripped(&self.fail_appends) {
            return Err(unavailable());
        }
        self.inner.append_click(click).await
    }

    async fn clicks_for_code_ordered(&self, short_code: &str) -> StoreResult<Vec<ClickEvent>> {
        if tripped(&self.missing_index) {
            return Err(StoreError::MissingIndex("clicks(short_code, timestamp)".into()));
        }
        if tripped(&self.fail_click_reads) {
            return Err(unavailable());
        }
        self.inner.clicks_for_code_ordered(short_code).await
    }

    async fn clicks_for_code(&self, short_code: &str) -> StoreResult<Vec<ClickEvent>> {
        if tripped(&self.fail_click_reads) {
            return Err(unavailable());
        }
        // Hand back the memory store's insertion order reversed so the
        // caller cannot rely on it.
        let mut clicks = self.inner.clicks_for_code(short_code).await?;
        clicks.reverse();
        Ok(clicks)
    }
}
