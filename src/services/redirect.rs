use std::{sync::Arc, time::Duration};

use chrono::Utc;
use dashmap::DashMap;

use crate::{
    cache::LinkCache,
    error::AppError,
    models::NewClick,
    store::{ClickStore, LinkStore},
};

/// Request metadata captured for a click.
#[derive(Debug, Clone, Default)]
pub struct Visit {
    /// Identifies one logical request; duplicate executions share it.
    pub request_id: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
}

/// Set of redirect executions currently recording a click.
#[derive(Clone, Debug, Default)]
pub struct InFlight {
    keys: Arc<DashMap<String, ()>>,
}

/// Held while a click is being recorded; releases its key on drop.
#[derive(Debug)]
pub struct InFlightTicket {
    keys: Arc<DashMap<String, ()>>,
    key: String,
}

impl InFlight {
    /// Claim `key`. `None` means another execution already holds it.
    pub fn try_acquire(&self, key: String) -> Option<InFlightTicket> {
        use dashmap::mapref::entry::Entry;

        match self.keys.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightTicket {
                    keys: Arc::clone(&self.keys),
                    key,
                })
            }
        }
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

/// Resolves short codes and records the visit.
///
/// Recording (click append plus counter increment) is best effort: failures
/// and timeouts are logged and never change what the caller gets back.
#[derive(Clone)]
pub struct RedirectPipeline {
    links: Arc<dyn LinkStore>,
    clicks: Arc<dyn ClickStore>,
    cache: LinkCache,
    in_flight: InFlight,
    record_timeout: Duration,
}

impl RedirectPipeline {
    pub fn new(
        links: Arc<dyn LinkStore>,
        clicks: Arc<dyn ClickStore>,
        cache: LinkCache,
        record_timeout: Duration,
    ) -> Self {
        Self {
            links,
            clicks,
            cache,
            in_flight: InFlight::default(),
            record_timeout,
        }
    }

    /// Look up `code`, record the visit, and return the destination URL.
    ///
    /// An unknown code fails with [`AppError::LinkNotFound`] and records
    /// nothing.
    pub async fn resolve_and_record(&self, code: &str, visit: Visit) -> Result<String, AppError> {
        let original_url = self.resolve(code).await?;

        let key = visit
            .request_id
            .as_deref()
            .map(|id| format!("{id}:{code}"));
        match key {
            Some(key) => match self.in_flight.try_acquire(key) {
                Some(ticket) => self.record(code, visit, Some(ticket)).await,
                None => tracing::debug!(short_code = code, "duplicate execution, click not recorded"),
            },
            None => self.record(code, visit, None).await,
        }

        Ok(original_url)
    }

    async fn resolve(&self, code: &str) -> Result<String, AppError> {
        if let Some(url) = self.cache.get(code) {
            return Ok(url);
        }

        match self.links.find_by_code(code).await? {
            Some(link) => {
                self.cache.set(&link.short_code, &link.original_url);
                Ok(link.original_url)
            }
            None => Err(AppError::LinkNotFound(code.to_owned())),
        }
    }

    /// Append the click and bump the counter concurrently, waiting at most
    /// `record_timeout`.
    ///
    /// The work runs on its own task so it still finishes (or times out) if
    /// the request that started it goes away.
    async fn record(&self, code: &str, visit: Visit, ticket: Option<InFlightTicket>) {
        let links = Arc::clone(&self.links);
        let clicks = Arc::clone(&self.clicks);
        let timeout = self.record_timeout;
        let code = code.to_owned();

        let task = tokio::spawn(async move {
            let _ticket = ticket;
            let now = Utc::now();
            let click = NewClick::new(
                code.clone(),
                now,
                visit.referrer.as_deref(),
                visit.user_agent.as_deref(),
            );

            let work = async {
                tokio::join!(clicks.append_click(click), links.increment_clicks(&code, now))
            };

            match tokio::time::timeout(timeout, work).await {
                Ok((appended, incremented)) => {
                    if let Err(e) = appended {
                        tracing::warn!(short_code = %code, "failed to record click: {}", e);
                    }
                    match incremented {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!(short_code = %code, "click counter target vanished")
                        }
                        Err(e) => {
                            tracing::warn!(short_code = %code, "failed to increment click count: {}", e)
                        }
                    }
                }
                Err(_) => tracing::warn!(
                    short_code = %code,
                    timeout_ms = timeout.as_millis() as u64,
                    "click recording timed out and was abandoned"
                ),
            }
        });

        if let Err(e) = task.await {
            tracing::error!("click recording task failed: {}", e);
        }
    }
}
