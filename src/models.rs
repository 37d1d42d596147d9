use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A shortened link record from the `links` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Link {
    pub id: i64,
    pub original_url: String,
    pub short_code: String,
    pub custom_short_code: Option<String>,
    pub owner_id: String,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Link {
    /// The code visitors are expected to use: the custom one when present.
    pub fn public_code(&self) -> &str {
        self.custom_short_code.as_deref().unwrap_or(&self.short_code)
    }
}

/// A link row joined with its click counter, used for listings.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LinkWithStats {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub link: Link,
    pub click_count: i64,
}

/// Values needed to insert a link.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub original_url: String,
    pub short_code: String,
    pub custom_short_code: Option<String>,
    pub owner_id: String,
    pub expired_at: Option<DateTime<Utc>>,
}

/// What a redirect needs from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    pub original_url: String,
    pub expired_at: Option<DateTime<Utc>>,
}

/// A single click event from the `click_logs` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClickLogEntry {
    pub code: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub device_type: String,
    pub browser: String,
    pub country: String,
    pub traffic_source: String,
    pub clicked_at: DateTime<Utc>,
}

/// Sort order for link listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOrder {
    #[default]
    CreatedAt,
    Counts,
}

/// One row of a breakdown table: value, occurrences, percent of total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakdown {
    pub name: String,
    pub count: i64,
    pub percentage: i64,
}

/// Per-link analytics returned by `GET /links/:id`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub link: Link,
    pub short_url: String,
    pub total_clicks: i64,
    pub devices: Vec<Breakdown>,
    pub browsers: Vec<Breakdown>,
    pub countries: Vec<Breakdown>,
    pub traffic_sources: Vec<Breakdown>,
    pub recent_clicks: Vec<ClickLogEntry>,
}

/// Clicks on one UTC day (`YYYY-MM-DD`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DailyClicks {
    pub date: String,
    pub clicks: i64,
}

/// Window for account-wide analytics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum TimeRange {
    #[serde(rename = "7d")]
    Week,
    #[default]
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "7d" => Some(Self::Week),
            "30d" => Some(Self::Month),
            "90d" => Some(Self::Quarter),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Start of the window ending at `now`; `None` means all time.
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = match self {
            Self::Week => 7,
            Self::Month => 30,
            Self::Quarter => 90,
            Self::All => return None,
        };
        Some(now - chrono::Duration::days(days))
    }
}
