use crate::models::{
    ClickLogEntry, DailyClicks, Link, LinkOrder, LinkWithStats, NewLink, ResolvedLink,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

const LINK_COLUMNS: &str =
    "id, original_url, short_code, custom_short_code, owner_id, expired_at, created_at";

/// Clicks on any code owned by `?1`, at or after `?2` (NULL = all time).
const OWNED_CLICKS: &str = "click_logs c
     WHERE c.code IN (
         SELECT short_code FROM links WHERE owner_id = ?1
         UNION
         SELECT custom_short_code FROM links
          WHERE owner_id = ?1 AND custom_short_code IS NOT NULL
     )
     AND (?2 IS NULL OR c.clicked_at >= ?2)";

// ── Redirect-path seams ────────────────────────────────────────────────────

/// Resolve a short code (generated or custom) to its destination.
///
/// Unknown and expired codes both come back as `Ok(None)`.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, code: &str) -> Result<Option<ResolvedLink>, sqlx::Error>;
}

/// Append-only sink for click events.
#[async_trait]
pub trait ClickRecorder: Send + Sync {
    async fn append(&self, entry: &ClickLogEntry) -> Result<(), sqlx::Error>;
}

/// SQLite implementation of both redirect seams.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinkResolver for SqliteStore {
    async fn resolve(&self, code: &str) -> Result<Option<ResolvedLink>, sqlx::Error> {
        resolve_code(&self.pool, code).await
    }
}

#[async_trait]
impl ClickRecorder for SqliteStore {
    async fn append(&self, entry: &ClickLogEntry) -> Result<(), sqlx::Error> {
        log_click(&self.pool, entry).await
    }
}

// ── Health ─────────────────────────────────────────────────────────────────

pub async fn ping(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

// ── Links ──────────────────────────────────────────────────────────────────

/// Insert a new link and return the newly created row.
pub async fn create_link(pool: &SqlitePool, new: &NewLink) -> Result<Link, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO links
             (original_url, short_code, custom_short_code, owner_id, expired_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&new.original_url)
    .bind(&new.short_code)
    .bind(new.custom_short_code.as_deref())
    .bind(&new.owner_id)
    .bind(new.expired_at)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    let link: Link = sqlx::query_as(&format!("SELECT {LINK_COLUMNS} FROM links WHERE id = ?1"))
        .bind(id)
        .fetch_one(pool)
        .await?;

    Ok(link)
}

/// `true` if `code` is taken as either a generated or a custom code.
pub async fn code_in_use(pool: &SqlitePool, code: &str) -> Result<bool, sqlx::Error> {
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(
             SELECT 1 FROM links WHERE short_code = ?1 OR custom_short_code = ?1
         )",
    )
    .bind(code)
    .fetch_one(pool)
    .await?;

    Ok(taken)
}

/// Look up a code for a redirect, ignoring owner. Expired links are filtered
/// out here so callers cannot tell them apart from unknown codes.
pub async fn resolve_code(
    pool: &SqlitePool,
    code: &str,
) -> Result<Option<ResolvedLink>, sqlx::Error> {
    let row: Option<(String, Option<chrono::DateTime<Utc>>)> = sqlx::query_as(
        "SELECT original_url, expired_at FROM links
         WHERE short_code = ?1 OR custom_short_code = ?1
         LIMIT 1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;

    let now = Utc::now();
    Ok(row
        .filter(|(_, expired_at)| expired_at.map_or(true, |at| at > now))
        .map(|(original_url, expired_at)| ResolvedLink {
            original_url,
            expired_at,
        }))
}

/// One page of an owner's links with click counters.
pub async fn list_links(
    pool: &SqlitePool,
    owner_id: &str,
    limit: i64,
    offset: i64,
    order: LinkOrder,
) -> Result<Vec<LinkWithStats>, sqlx::Error> {
    let order_by = match order {
        LinkOrder::CreatedAt => "l.created_at DESC, l.id DESC",
        LinkOrder::Counts => "click_count DESC, l.created_at DESC, l.id DESC",
    };

    let sql = format!(
        "SELECT l.id, l.original_url, l.short_code, l.custom_short_code, l.owner_id,
                l.expired_at, l.created_at,
                (SELECT COUNT(*) FROM click_logs c
                  WHERE c.code = l.short_code OR c.code = l.custom_short_code) AS click_count
         FROM links l
         WHERE l.owner_id = ?1
         ORDER BY {order_by}
         LIMIT ?2 OFFSET ?3"
    );

    sqlx::query_as(&sql)
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
}

/// Fetch a single link by its primary key, scoped to its owner.
pub async fn get_link(
    pool: &SqlitePool,
    owner_id: &str,
    id: i64,
) -> Result<Option<Link>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {LINK_COLUMNS} FROM links WHERE id = ?1 AND owner_id = ?2"
    ))
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await
}

/// Permanently delete a link together with its click history.
///
/// Clicks are keyed by code, so leaving them behind would hand them to the
/// next link that takes the same custom code.
pub async fn delete_link(pool: &SqlitePool, owner_id: &str, id: i64) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let deleted: Option<(String, Option<String>)> = sqlx::query_as(
        "DELETE FROM links WHERE id = ?1 AND owner_id = ?2
         RETURNING short_code, custom_short_code",
    )
    .bind(id)
    .bind(owner_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((short_code, custom_short_code)) = deleted else {
        return Ok(false);
    };

    sqlx::query("DELETE FROM click_logs WHERE code = ?1 OR code = ?2")
        .bind(&short_code)
        .bind(custom_short_code.as_deref())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

// ── Clicks ─────────────────────────────────────────────────────────────────

/// Record a click event.
pub async fn log_click(pool: &SqlitePool, entry: &ClickLogEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO click_logs
             (code, ip_address, user_agent, referrer, device_type, browser,
              country, traffic_source, clicked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&entry.code)
    .bind(entry.ip_address.as_deref())
    .bind(entry.user_agent.as_deref())
    .bind(entry.referrer.as_deref())
    .bind(&entry.device_type)
    .bind(&entry.browser)
    .bind(&entry.country)
    .bind(&entry.traffic_source)
    .bind(entry.clicked_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Total clicks for a link plus its `limit` most recent click events.
pub async fn click_history(
    pool: &SqlitePool,
    link: &Link,
    limit: i64,
) -> Result<(i64, Vec<ClickLogEntry>), sqlx::Error> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM click_logs WHERE code = ?1 OR code = ?2",
    )
    .bind(&link.short_code)
    .bind(link.custom_short_code.as_deref())
    .fetch_one(pool)
    .await?;

    let clicks: Vec<ClickLogEntry> = sqlx::query_as(
        "SELECT code, ip_address, user_agent, referrer, device_type, browser,
                country, traffic_source, clicked_at
         FROM click_logs
         WHERE code = ?1 OR code = ?2
         ORDER BY clicked_at DESC, id DESC
         LIMIT ?3",
    )
    .bind(&link.short_code)
    .bind(link.custom_short_code.as_deref())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok((total, clicks))
}

// ── Account analytics ──────────────────────────────────────────────────────

/// Click attribute an account-wide breakdown groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickDimension {
    Device,
    Browser,
    Country,
    TrafficSource,
}

impl ClickDimension {
    fn column(self) -> &'static str {
        match self {
            ClickDimension::Device => "device_type",
            ClickDimension::Browser => "browser",
            ClickDimension::Country => "country",
            ClickDimension::TrafficSource => "traffic_source",
        }
    }
}

/// Links of `owner_id` that have not expired yet.
pub async fn active_link_count(pool: &SqlitePool, owner_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM links
         WHERE owner_id = ?1 AND (expired_at IS NULL OR expired_at > ?2)",
    )
    .bind(owner_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
}

/// Clicks across every link of `owner_id` since `since` (all time when `None`).
pub async fn owner_click_total(
    pool: &SqlitePool,
    owner_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {OWNED_CLICKS}"))
        .bind(owner_id)
        .bind(since)
        .fetch_one(pool)
        .await
}

/// Clicks per UTC day, oldest day first. Days without clicks are absent.
pub async fn daily_clicks(
    pool: &SqlitePool,
    owner_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<DailyClicks>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT substr(c.clicked_at, 1, 10) AS date, COUNT(*) AS clicks
         FROM {OWNED_CLICKS}
         GROUP BY date
         ORDER BY date"
    ))
    .bind(owner_id)
    .bind(since)
    .fetch_all(pool)
    .await
}

/// The ten most frequent values of `dimension` with their click counts.
pub async fn click_counts(
    pool: &SqlitePool,
    owner_id: &str,
    since: Option<DateTime<Utc>>,
    dimension: ClickDimension,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    let column = dimension.column();
    sqlx::query_as(&format!(
        "SELECT c.{column} AS name, COUNT(*) AS count
         FROM {OWNED_CLICKS} AND c.{column} <> ''
         GROUP BY c.{column}
         ORDER BY count DESC, name
         LIMIT 10"
    ))
    .bind(owner_id)
    .bind(since)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}
