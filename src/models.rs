use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

/// Sentinel stored and reported for clicks that arrived without a referrer.
pub const DIRECT_REFERRER: &str = "Direct";

/// A shortened link record from the `links` collection.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Link {
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    /// `None` for guest-created links.
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub total_clicks: i64,
    pub last_clicked_at: Option<DateTime<Utc>>,
}

/// Fields needed to create a link; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub short_code: String,
    pub original_url: String,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Click timestamp as it comes back from the store: epoch milliseconds for
/// everything this service writes, or a native datetime for older rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTimestamp {
    EpochMillis(i64),
    Native(NaiveDateTime),
}

impl RawTimestamp {
    pub fn as_millis(&self) -> i64 {
        match self {
            Self::EpochMillis(ms) => *ms,
            Self::Native(dt) => dt.and_utc().timestamp_millis(),
        }
    }
}

/// A single click event from the `clicks` collection. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickEvent {
    pub id: i64,
    pub short_code: String,
    pub timestamp: RawTimestamp,
    pub referrer: String,
    pub user_agent: String,
}

/// Fields needed to append a click event.
#[derive(Debug, Clone)]
pub struct NewClick {
    pub short_code: String,
    pub timestamp: DateTime<Utc>,
    pub referrer: String,
    pub user_agent: String,
}

impl NewClick {
    /// Build a click record, substituting the "Direct" sentinel for an absent
    /// or empty referrer.
    pub fn new(
        short_code: impl Into<String>,
        timestamp: DateTime<Utc>,
        referrer: Option<&str>,
        user_agent: Option<&str>,
    ) -> Self {
        Self {
            short_code: short_code.into(),
            timestamp,
            referrer: normalize_referrer(referrer).to_owned(),
            user_agent: user_agent.unwrap_or_default().to_owned(),
        }
    }
}

pub fn normalize_referrer(referrer: Option<&str>) -> &str {
    match referrer.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => DIRECT_REFERRER,
    }
}

/// One bucket of the clicks-over-time series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateCount {
    pub date: NaiveDate,
    pub count: i64,
}

/// One row of a named breakdown (referrers, devices, browsers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedCount {
    pub name: String,
    pub value: i64,
}

/// Derived click statistics for one short code. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalyticsSummary {
    pub total_clicks: i64,
    pub clicks_over_time: Vec<DateCount>,
    pub referrers: Vec<NamedCount>,
    pub devices: Vec<NamedCount>,
    pub browsers: Vec<NamedCount>,
}

/// Dashboard totals across one owner's links.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OwnerSummary {
    pub total_links: usize,
    pub total_clicks: i64,
    pub most_clicked_link: Option<Link>,
}

/// Current user as asserted by the external auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
}
