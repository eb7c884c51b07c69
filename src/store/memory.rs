use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};

use super::{ClickStore, LinkStore, StoreResult};
use crate::{
    error::StoreError,
    models::{ClickEvent, Link, NewClick, NewLink, RawTimestamp},
};

/// In-process store for both collections.
///
/// Links are keyed by short code, so the map itself is the uniqueness
/// constraint. Counter updates happen under the shard lock and are atomic.
/// Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    links: DashMap<String, Link>,
    clicks: DashMap<String, Vec<ClickEvent>>,
    next_link_id: AtomicI64,
    next_click_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinkStore for MemoryStore {
    async fn insert_link(&self, link: NewLink) -> StoreResult<Link> {
        match self.links.entry(link.short_code.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(link.short_code)),
            Entry::Vacant(slot) => {
                let stored = Link {
                    id: self.next_link_id.fetch_add(1, Ordering::Relaxed) + 1,
                    short_code: link.short_code,
                    original_url: link.original_url,
                    owner_id: link.owner_id,
                    created_at: link.created_at,
                    total_clicks: 0,
                    last_clicked_at: None,
                };
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn find_by_code(&self, short_code: &str) -> StoreResult<Option<Link>> {
        Ok(self.links.get(short_code).map(|l| l.clone()))
    }

    async fn links_for_owner(&self, owner_id: &str) -> StoreResult<Vec<Link>> {
        let mut links: Vec<Link> = self
            .links
            .iter()
            .filter(|l| l.owner_id.as_deref() == Some(owner_id))
            .map(|l| l.clone())
            .collect();
        links.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(links)
    }

    async fn increment_clicks(&self, short_code: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        match self.links.get_mut(short_code) {
            Some(mut link) => {
                link.total_clicks += 1;
                link.last_clicked_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn all_links(&self) -> StoreResult<Vec<Link>> {
        Ok(self.links.iter().map(|l| l.clone()).collect())
    }
}

#[async_trait]
impl ClickStore for MemoryStore {
    async fn append_click(&self, click: NewClick) -> StoreResult<ClickEvent> {
        let event = ClickEvent {
            id: self.next_click_id.fetch_add(1, Ordering::Relaxed) + 1,
            short_code: click.short_code,
            timestamp: RawTimestamp::EpochMillis(click.timestamp.timestamp_millis()),
            referrer: click.referrer,
            user_agent: click.user_agent,
        };
        self.clicks
            .entry(event.short_code.clone())
            .or_default()
            .push(event.clone());
        Ok(event)
    }

    async fn clicks_for_code_ordered(&self, short_code: &str) -> StoreResult<Vec<ClickEvent>> {
        let mut clicks = self.clicks_for_code(short_code).await?;
        clicks.sort_by_key(|c| std::cmp::Reverse(c.timestamp.as_millis()));
        Ok(clicks)
    }

    async fn clicks_for_code(&self, short_code: &str) -> StoreResult<Vec<ClickEvent>> {
        Ok(self
            .clicks
            .get(short_code)
            .map(|c| c.clone())
            .unwrap_or_default())
    }
}
