use std::{collections::HashMap, future::Future, sync::Arc};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use woothee::parser::Parser;

use crate::{
    error::StoreError,
    models::{
        normalize_referrer, AnalyticsSummary, ClickEvent, DateCount, Link, NamedCount,
        OwnerSummary,
    },
    store::ClickStore,
};

const TOP_REFERRERS: usize = 5;
const TOP_BROWSERS: usize = 5;

/// Turns raw click events into the per-link statistics shown on the stats page.
#[derive(Clone)]
pub struct Analytics {
    clicks: Arc<dyn ClickStore>,
}

impl Analytics {
    pub fn new(clicks: Arc<dyn ClickStore>) -> Self {
        Self { clicks }
    }

    /// Summarize every click recorded for `short_code`, bucketing dates in
    /// the viewer's `offset`.
    ///
    /// Never fails: if the clicks cannot be read the summary is empty.
    pub async fn summarize(&self, short_code: &str, offset: FixedOffset) -> AnalyticsSummary {
        let fetched = with_index_fallback(
            || self.clicks.clicks_for_code_ordered(short_code),
            || async {
                let mut clicks = self.clicks.clicks_for_code(short_code).await?;
                sort_newest_first(&mut clicks);
                Ok::<_, StoreError>(clicks)
            },
        )
        .await;

        match fetched {
            Ok(clicks) => aggregate(&clicks, offset),
            Err(e) => {
                tracing::error!(short_code, "analytics unavailable, returning empty summary: {}", e);
                AnalyticsSummary::default()
            }
        }
    }
}

/// Run `primary`; if the store says it lacks the index the query needs, run
/// `fallback` instead. Any other outcome of `primary` is returned as-is.
pub async fn with_index_fallback<T, P, PF, F, FF>(primary: P, fallback: F) -> Result<T, StoreError>
where
    P: FnOnce() -> PF,
    PF: Future<Output = Result<T, StoreError>>,
    F: FnOnce() -> FF,
    FF: Future<Output = Result<T, StoreError>>,
{
    match primary().await {
        Err(StoreError::MissingIndex(index)) => {
            tracing::warn!(index = %index, "index not found, using unordered query");
            fallback().await
        }
        other => other,
    }
}

fn sort_newest_first(clicks: &mut [ClickEvent]) {
    clicks.sort_by_key(|c| std::cmp::Reverse(c.timestamp.as_millis()));
}

/// Pure aggregation over an already-fetched click set. Input order does not
/// affect the result.
pub fn aggregate(clicks: &[ClickEvent], offset: FixedOffset) -> AnalyticsSummary {
    let mut by_date: HashMap<NaiveDate, i64> = HashMap::new();
    for click in clicks {
        *by_date.entry(local_date(click, offset)).or_insert(0) += 1;
    }
    let mut clicks_over_time: Vec<DateCount> = by_date
        .into_iter()
        .map(|(date, count)| DateCount { date, count })
        .collect();
    clicks_over_time.sort_by_key(|d| d.date);

    let mut referrers = count_by(clicks.iter().map(|c| normalize_referrer(Some(&c.referrer))));
    referrers.truncate(TOP_REFERRERS);

    let devices = count_by(clicks.iter().map(|c| device_type(&c.user_agent)));

    let parser = Parser::new();
    let mut browsers = count_by(clicks.iter().map(|c| browser_name(&parser, &c.user_agent)));
    browsers.truncate(TOP_BROWSERS);

    AnalyticsSummary {
        total_clicks: clicks.len() as i64,
        clicks_over_time,
        referrers,
        devices,
        browsers,
    }
}

/// Calendar date of a click in the viewer's offset. Timestamps outside what
/// chrono can represent are clamped to its range (less a day of headroom for
/// the offset) so every counted click lands in some bucket.
fn local_date(click: &ClickEvent, offset: FixedOffset) -> NaiveDate {
    let day_ms = 24 * 60 * 60 * 1000;
    let earliest = DateTime::<Utc>::MIN_UTC.timestamp_millis() + day_ms;
    let latest = DateTime::<Utc>::MAX_UTC.timestamp_millis() - day_ms;

    let ms = click.timestamp.as_millis();
    let clamped = ms.clamp(earliest, latest);
    if clamped != ms {
        tracing::debug!(click_id = click.id, ms, "click timestamp out of range, clamped");
    }

    DateTime::from_timestamp_millis(clamped)
        .unwrap_or_default()
        .with_timezone(&offset)
        .date_naive()
}

/// Device bucket from a raw user-agent string.
pub fn device_type(user_agent: &str) -> &'static str {
    let ua = user_agent.to_ascii_lowercase();
    if ua.contains("mobile") {
        "Mobile"
    } else if ua.contains("tablet") || ua.contains("ipad") {
        "Tablet"
    } else {
        "Desktop"
    }
}

fn browser_name<'a>(parser: &Parser, user_agent: &'a str) -> &'a str {
    match parser.parse(user_agent) {
        Some(result) if !result.name.is_empty() && result.name != "UNKNOWN" => result.name,
        _ => "Other",
    }
}

/// Tally occurrences, sort descending by count. Ties keep first-seen order.
fn count_by<'a>(iter: impl Iterator<Item = &'a str>) -> Vec<NamedCount> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for name in iter {
        let count = counts.entry(name).or_insert_with(|| {
            order.push(name);
            0
        });
        *count += 1;
    }

    let mut sorted: Vec<NamedCount> = order
        .into_iter()
        .map(|name| NamedCount {
            name: name.to_owned(),
            value: counts[name],
        })
        .collect();
    // Stable sort, so equal counts stay in first-seen order.
    sorted.sort_by(|a, b| b.value.cmp(&a.value));
    sorted
}

/// Dashboard totals over one owner's links. The most clicked link is the
/// first one with the highest count.
pub fn summarize_for_owner(links: &[Link]) -> OwnerSummary {
    let most_clicked_link = links
        .iter()
        .fold(None::<&Link>, |best, link| match best {
            Some(b) if b.total_clicks >= link.total_clicks => Some(b),
            _ => Some(link),
        })
        .cloned();

    OwnerSummary {
        total_links: links.len(),
        total_clicks: links.iter().map(|l| l.total_clicks).sum(),
        most_clicked_link,
    }
}
