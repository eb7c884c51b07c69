use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};

use super::{ClickStore, LinkStore, StoreResult};
use crate::{
    error::StoreError,
    models::{ClickEvent, Link, NewClick, NewLink, RawTimestamp},
};

/// Index that makes the ordered click query cheap. The ordered query refuses
/// to run without it.
pub const CLICKS_ORDER_INDEX: &str = "idx_clicks_short_code_timestamp";

const LINK_COLUMNS: &str =
    "id, short_code, original_url, owner_id, created_at, total_clicks, last_clicked_at";

/// SQLite-backed store for both collections.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url` and run the
    /// embedded migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(
                database_url
                    .parse::<SqliteConnectOptions>()?
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal),
            )
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying migrations first.
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
        Ok(Self { pool })
    }

    async fn has_order_index(&self) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1",
        )
        .bind(CLICKS_ORDER_INDEX)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LinkStore for SqliteStore {
    async fn insert_link(&self, link: NewLink) -> StoreResult<Link> {
        let id = sqlx::query(
            "INSERT INTO links (short_code, original_url, owner_id, created_at, total_clicks)
             VALUES (?1, ?2, ?3, ?4, 0)",
        )
        .bind(&link.short_code)
        .bind(&link.original_url)
        .bind(link.owner_id.as_deref())
        .bind(link.created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let link: Link = sqlx::query_as(&format!("SELECT {LINK_COLUMNS} FROM links WHERE id = ?1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(link)
    }

    async fn find_by_code(&self, short_code: &str) -> StoreResult<Option<Link>> {
        let link: Option<Link> = sqlx::query_as(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE short_code = ?1 LIMIT 1"
        ))
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn links_for_owner(&self, owner_id: &str) -> StoreResult<Vec<Link>> {
        // julianday() keeps the ordering right when stored timestamps differ
        // in their number of fractional digits.
        let links: Vec<Link> = sqlx::query_as(&format!(
            "SELECT {LINK_COLUMNS} FROM links
             WHERE owner_id = ?1
             ORDER BY julianday(created_at) DESC, id DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    async fn increment_clicks(&self, short_code: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let affected = sqlx::query(
            "UPDATE links
             SET total_clicks = total_clicks + 1, last_clicked_at = ?2
             WHERE short_code = ?1",
        )
        .bind(short_code)
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected > 0)
    }

    async fn all_links(&self) -> StoreResult<Vec<Link>> {
        let links: Vec<Link> = sqlx::query_as(&format!("SELECT {LINK_COLUMNS} FROM links"))
            .fetch_all(&self.pool)
            .await?;

        Ok(links)
    }
}

#[async_trait]
impl ClickStore for SqliteStore {
    async fn append_click(&self, click: NewClick) -> StoreResult<ClickEvent> {
        let millis = click.timestamp.timestamp_millis();
        let id = sqlx::query(
            "INSERT INTO clicks (short_code, timestamp, referrer, user_agent)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&click.short_code)
        .bind(millis)
        .bind(&click.referrer)
        .bind(&click.user_agent)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(ClickEvent {
            id,
            short_code: click.short_code,
            timestamp: RawTimestamp::EpochMillis(millis),
            referrer: click.referrer,
            user_agent: click.user_agent,
        })
    }

    async fn clicks_for_code_ordered(&self, short_code: &str) -> StoreResult<Vec<ClickEvent>> {
        if !self.has_order_index().await? {
            return Err(StoreError::MissingIndex(CLICKS_ORDER_INDEX.to_owned()));
        }

        let rows = sqlx::query(
            "SELECT id, short_code, timestamp, referrer, user_agent
             FROM clicks
             WHERE short_code = ?1
             ORDER BY CASE typeof(timestamp)
                 WHEN 'integer' THEN timestamp
                 ELSE CAST((julianday(timestamp) - 2440587.5) * 86400000 AS INTEGER)
             END DESC",
        )
        .bind(short_code)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(click_from_row).collect()
    }

    async fn clicks_for_code(&self, short_code: &str) -> StoreResult<Vec<ClickEvent>> {
        let rows = sqlx::query(
            "SELECT id, short_code, timestamp, referrer, user_agent
             FROM clicks
             WHERE short_code = ?1",
        )
        .bind(short_code)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(click_from_row).collect()
    }
}

/// Decode a click row. `timestamp` is epoch milliseconds for rows this
/// service wrote and a datetime string for imported ones.
fn click_from_row(row: &SqliteRow) -> StoreResult<ClickEvent> {
    let timestamp = match row.try_get::<i64, _>("timestamp") {
        Ok(ms) => RawTimestamp::EpochMillis(ms),
        Err(_) => RawTimestamp::Native(row.try_get::<NaiveDateTime, _>("timestamp")?),
    };

    Ok(ClickEvent {
        id: row.try_get("id")?,
        short_code: row.try_get("short_code")?,
        timestamp,
        referrer: row.try_get("referrer")?,
        user_agent: row.try_get("user_agent")?,
    })
}

#[cfg(test)]
pub(crate) async fn memory_store() -> SqliteStore {
    // A single never-recycled connection: every new connection to
    // `sqlite::memory:` would see an empty database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    SqliteStore::from_pool(pool).await.unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_link(code: &str, owner: Option<&str>, created_at: DateTime<Utc>) -> NewLink {
        NewLink {
            short_code: code.to_owned(),
            original_url: format!("https://example.com/{code}"),
            owner_id: owner.map(str::to_owned),
            created_at,
        }
    }

    #[tokio::test]
    async fn insert_and_find() {
        let store = memory_store().await;
        let now = Utc::now();

        let link = store.insert_link(new_link("abc123", None, now)).await.unwrap();
        assert_eq!(link.short_code, "abc123");
        assert_eq!(link.total_clicks, 0);
        assert_eq!(link.last_clicked_at, None);
        assert_eq!(link.owner_id, None);

        let found = store.find_by_code("abc123").await.unwrap().unwrap();
        assert_eq!(found.id, link.id);
        assert_eq!(found.original_url, "https://example.com/abc123");
        assert!(store.find_by_code("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_code_is_a_conflict() {
        let store = memory_store().await;
        let now = Utc::now();

        store.insert_link(new_link("taken", None, now)).await.unwrap();
        let err = store
            .insert_link(new_link("taken", Some("u1"), now))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn owner_links_are_newest_first() {
        let store = memory_store().await;
        let t0 = Utc::now() - chrono::Duration::hours(2);
        let t1 = t0 + chrono::Duration::milliseconds(1500);
        let t2 = t0 + chrono::Duration::hours(1);

        store.insert_link(new_link("old", Some("u1"), t0)).await.unwrap();
        store.insert_link(new_link("new", Some("u1"), t2)).await.unwrap();
        store.insert_link(new_link("mid", Some("u1"), t1)).await.unwrap();
        store.insert_link(new_link("other", Some("u2"), t2)).await.unwrap();
        store.insert_link(new_link("guest", None, t2)).await.unwrap();

        let codes: Vec<String> = store
            .links_for_owner("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.short_code)
            .collect();
        assert_eq!(codes, ["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn increment_updates_counter_and_last_click() {
        let store = memory_store().await;
        store
            .insert_link(new_link("abc123", None, Utc::now()))
            .await
            .unwrap();

        let at = Utc::now();
        assert!(store.increment_clicks("abc123", at).await.unwrap());
        assert!(store.increment_clicks("abc123", at).await.unwrap());
        assert!(!store.increment_clicks("missing", at).await.unwrap());

        let link = store.find_by_code("abc123").await.unwrap().unwrap();
        assert_eq!(link.total_clicks, 2);
        assert_eq!(
            link.last_clicked_at.map(|t| t.timestamp_millis()),
            Some(at.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn ordered_clicks_are_newest_first() {
        let store = memory_store().await;
        let base = Utc::now();
        for secs in [10, 30, 20] {
            store
                .append_click(NewClick::new(
                    "abc123",
                    base + chrono::Duration::seconds(secs),
                    None,
                    Some("curl/8.0"),
                ))
                .await
                .unwrap();
        }
        store
            .append_click(NewClick::new("other", base, None, None))
            .await
            .unwrap();

        let clicks = store.clicks_for_code_ordered("abc123").await.unwrap();
        let millis: Vec<i64> = clicks.iter().map(|c| c.timestamp.as_millis()).collect();
        let expected: Vec<i64> = [30, 20, 10]
            .iter()
            .map(|s| (base + chrono::Duration::seconds(*s)).timestamp_millis())
            .collect();
        assert_eq!(millis, expected);
        assert!(clicks.iter().all(|c| c.referrer == "Direct"));
    }

    #[tokio::test]
    async fn ordered_query_reports_missing_index() {
        let store = memory_store().await;
        sqlx::query(&format!("DROP INDEX {CLICKS_ORDER_INDEX}"))
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.clicks_for_code_ordered("abc123").await.unwrap_err();
        assert!(matches!(err, StoreError::MissingIndex(_)));
        assert!(store.clicks_for_code("abc123").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reads_datetime_timestamps_from_imported_rows() {
        let store = memory_store().await;
        sqlx::query(
            "INSERT INTO clicks (short_code, timestamp, referrer, user_agent)
             VALUES ('abc123', '2024-03-01 12:30:00', 'google.com', '')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let clicks = store.clicks_for_code("abc123").await.unwrap();
        assert_eq!(clicks.len(), 1);
        let expected = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(clicks[0].timestamp, RawTimestamp::Native(expected));
    }

    #[tokio::test]
    async fn ordered_clicks_mix_epoch_and_datetime_rows() {
        let store = memory_store().await;
        let at = |y, m, d| {
            chrono::NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc()
        };
        store
            .append_click(NewClick::new("abc123", at(2023, 1, 1), Some("old"), None))
            .await
            .unwrap();
        store
            .append_click(NewClick::new("abc123", at(2024, 5, 1), Some("new"), None))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO clicks (short_code, timestamp, referrer, user_agent)
             VALUES ('abc123', '2024-03-01 12:30:00', 'imported', '')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let clicks = store.clicks_for_code_ordered("abc123").await.unwrap();
        let referrers: Vec<&str> = clicks.iter().map(|c| c.referrer.as_str()).collect();
        assert_eq!(referrers, ["new", "imported", "old"]);
    }
}
