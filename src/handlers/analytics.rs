use crate::{
    auth::AuthUser,
    db::{self, ClickDimension},
    error::AppError,
    handlers::{
        links::{link_view, LinkView},
        respond,
    },
    models::{Breakdown, DailyClicks, LinkOrder, LinkWithStats, TimeRange},
    AppState,
};
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};

const RECENT_LINKS: i64 = 5;

#[derive(Deserialize)]
pub struct AnalyticsParams {
    range: Option<String>,
}

#[derive(Serialize)]
pub struct Dashboard {
    total_clicks: i64,
    total_active_links: i64,
    top_link: Option<LinkView<LinkWithStats>>,
    overviews: Vec<DailyClicks>,
    recents: Vec<LinkView<LinkWithStats>>,
}

#[derive(Serialize)]
pub struct AccountAnalytics {
    time_range: TimeRange,
    from_date: Option<DateTime<Utc>>,
    to_date: DateTime<Utc>,
    total_clicks: i64,
    total_active_links: i64,
    avg_daily_clicks: i64,
    top_link: Option<LinkView<LinkWithStats>>,
    overviews: Vec<DailyClicks>,
    devices: Vec<Breakdown>,
    countries: Vec<Breakdown>,
    traffic_sources: Vec<Breakdown>,
    browsers: Vec<Breakdown>,
}

/// GET /analytics/dashboard
///
/// All-time totals, the most clicked link, clicks per day and the newest
/// links of the signed-in owner.
pub async fn dashboard(
    auth: AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let owner = auth.owner_id.as_str();

    let total_clicks = db::owner_click_total(&state.db, owner, None).await?;
    let total_active_links = db::active_link_count(&state.db, owner).await?;
    let top_link = top_link(&state, owner).await?;
    let overviews = db::daily_clicks(&state.db, owner, None).await?;
    let recents = db::list_links(&state.db, owner, RECENT_LINKS, 0, LinkOrder::CreatedAt)
        .await?
        .into_iter()
        .map(|stats| link_view(&state, stats))
        .collect();

    let dashboard = Dashboard {
        total_clicks,
        total_active_links,
        top_link,
        overviews,
        recents,
    };
    Ok(respond("successfully get dashboard", dashboard).into_response())
}

/// GET /analytics?range=7d|30d|90d|all
pub async fn account_analytics(
    auth: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Response, AppError> {
    let time_range = match params.range.as_deref().map(str::trim) {
        None | Some("") => TimeRange::default(),
        Some(raw) => TimeRange::parse(raw).ok_or_else(|| {
            AppError::BadRequest("range must be one of 7d, 30d, 90d, all".into())
        })?,
    };

    let owner = auth.owner_id.as_str();
    let now = Utc::now();
    let since = time_range.since(now);

    let total_clicks = db::owner_click_total(&state.db, owner, since).await?;
    let overviews = db::daily_clicks(&state.db, owner, since).await?;

    let devices = ranked(
        db::click_counts(&state.db, owner, since, ClickDimension::Device).await?,
        total_clicks,
    );
    let countries = ranked(
        db::click_counts(&state.db, owner, since, ClickDimension::Country).await?,
        total_clicks,
    );
    let traffic_sources = ranked(
        db::click_counts(&state.db, owner, since, ClickDimension::TrafficSource).await?,
        total_clicks,
    );
    let browsers = ranked(
        db::click_counts(&state.db, owner, since, ClickDimension::Browser).await?,
        total_clicks,
    );

    let analytics = AccountAnalytics {
        time_range,
        from_date: since,
        to_date: now,
        total_clicks,
        total_active_links: db::active_link_count(&state.db, owner).await?,
        avg_daily_clicks: total_clicks / window_days(since, &overviews, now),
        top_link: top_link(&state, owner).await?,
        devices,
        countries,
        traffic_sources,
        browsers,
        overviews,
    };
    Ok(respond("successfully get analytics", analytics).into_response())
}

async fn top_link(
    state: &AppState,
    owner: &str,
) -> Result<Option<LinkView<LinkWithStats>>, AppError> {
    let top = db::list_links(&state.db, owner, 1, 0, LinkOrder::Counts).await?;
    Ok(top.into_iter().next().map(|stats| link_view(state, stats)))
}

/// Days the average is spread over. An all-time window starts at the first
/// day with clicks. Never less than one.
fn window_days(
    since: Option<DateTime<Utc>>,
    overviews: &[DailyClicks],
    now: DateTime<Utc>,
) -> i64 {
    let days = match since {
        Some(from) => (now - from).num_days(),
        None => overviews
            .first()
            .and_then(|day| NaiveDate::parse_from_str(&day.date, "%Y-%m-%d").ok())
            .map_or(1, |first| (now.date_naive() - first).num_days() + 1),
    };
    days.max(1)
}

/// Tally occurrences of each non-empty value and rank them by count.
pub(crate) fn breakdown<'a>(values: impl Iterator<Item = &'a str>, sample: i64) -> Vec<Breakdown> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for val in values.filter(|v| !v.is_empty()) {
        *counts.entry(val).or_insert(0) += 1;
    }

    ranked(
        counts
            .into_iter()
            .map(|(name, count)| (name.to_owned(), count))
            .collect(),
        sample,
    )
}

/// Sort descending by count (ties by name), keep the top 10 and attach each
/// value's share of `total`.
fn ranked(mut rows: Vec<(String, i64)>, total: i64) -> Vec<Breakdown> {
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows.truncate(10);

    rows.into_iter()
        .map(|(name, count)| Breakdown {
            name,
            count,
            percentage: if total > 0 { count * 100 / total } else { 0 },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::testing::{body_json, TestApp},
        models::{ClickLogEntry, NewLink},
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use chrono::Duration;

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn seed_link(app: &TestApp, code: &str, owner: &str) {
        db::create_link(
            &app.pool,
            &NewLink {
                original_url: format!("https://example.com/{code}"),
                short_code: code.to_owned(),
                custom_short_code: None,
                owner_id: owner.to_owned(),
                expired_at: None,
            },
        )
        .await
        .unwrap();
    }

    async fn seed_click(app: &TestApp, code: &str, device: &str, age: Duration) {
        let entry = ClickLogEntry {
            code: code.to_owned(),
            ip_address: Some("8.8.8.8".into()),
            user_agent: None,
            referrer: None,
            device_type: device.to_owned(),
            browser: "Chrome".into(),
            country: "US".into(),
            traffic_source: "direct".into(),
            clicked_at: Utc::now() - age,
        };
        db::log_click(&app.pool, &entry).await.unwrap();
    }

    /// Two links for the operator (one popular), one for somebody else, and
    /// a click old enough to fall outside the 30 day window.
    async fn seeded() -> (TestApp, String) {
        let app = TestApp::new().await;
        let owner = app.state.config.admin_username.clone();
        seed_link(&app, "popular0", &owner).await;
        seed_link(&app, "quiet000", &owner).await;
        seed_link(&app, "bobs0000", "bob").await;

        seed_click(&app, "popular0", "mobile", Duration::zero()).await;
        seed_click(&app, "popular0", "mobile", Duration::hours(1)).await;
        seed_click(&app, "quiet000", "desktop", Duration::zero()).await;
        seed_click(&app, "popular0", "tablet", Duration::days(45)).await;
        seed_click(&app, "bobs0000", "desktop", Duration::zero()).await;

        let token = app.session_token().await;
        (app, token)
    }

    #[tokio::test]
    async fn dashboard_summarises_owner_links() {
        let (app, token) = seeded().await;

        let res = app.send(get("/analytics/dashboard", &token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let data = body_json(res).await["data"].clone();

        assert_eq!(data["total_clicks"], 4);
        assert_eq!(data["total_active_links"], 2);
        assert_eq!(data["top_link"]["short_code"], "popular0");
        assert_eq!(data["top_link"]["click_count"], 3);
        assert_eq!(data["top_link"]["short_url"], "http://sho.rt/popular0");
        assert_eq!(data["recents"].as_array().unwrap().len(), 2);
        assert_eq!(data["recents"][0]["short_code"], "quiet000");

        let overviews = data["overviews"].as_array().unwrap();
        assert!((2..=3).contains(&overviews.len()));
        let summed: i64 = overviews.iter().map(|d| d["clicks"].as_i64().unwrap()).sum();
        assert_eq!(summed, 4);
    }

    #[tokio::test]
    async fn analytics_respect_the_range() {
        let (app, token) = seeded().await;

        let res = app.send(get("/analytics", &token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let data = body_json(res).await["data"].clone();
        assert_eq!(data["time_range"], "30d");
        assert_eq!(data["total_clicks"], 3);
        assert_eq!(data["avg_daily_clicks"], 0);
        assert_eq!(data["devices"][0]["name"], "mobile");
        assert_eq!(data["devices"][0]["count"], 2);
        assert_eq!(data["devices"][0]["percentage"], 66);
        assert_eq!(data["countries"][0]["name"], "US");
        assert_eq!(data["browsers"][0]["count"], 3);

        let res = app.send(get("/analytics?range=all", &token)).await;
        let data = body_json(res).await["data"].clone();
        assert_eq!(data["total_clicks"], 4);
        assert!(data["from_date"].is_null());
        let devices = data["devices"].as_array().unwrap();
        assert!(devices.iter().any(|d| d["name"] == "tablet"));
        assert!(devices.iter().all(|d| d["name"] != "desktop" || d["count"] == 1));
    }

    #[tokio::test]
    async fn analytics_reject_unknown_range_and_anonymous_callers() {
        let (app, token) = seeded().await;

        let res = app.send(get("/analytics?range=1y", &token)).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        for uri in ["/analytics", "/analytics/dashboard"] {
            assert_eq!(app.get(uri).await.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[test]
    fn breakdown_sorts_and_computes_share() {
        let rows = breakdown(["a", "b", "a", "", "c", "a"].into_iter(), 6);
        assert_eq!(
            rows[0],
            Breakdown {
                name: "a".into(),
                count: 3,
                percentage: 50
            }
        );
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].name, "b");
        assert!(breakdown(std::iter::empty(), 0).is_empty());
    }

    #[test]
    fn averages_never_divide_by_zero() {
        let now = Utc::now();
        assert_eq!(window_days(Some(now - Duration::days(7)), &[], now), 7);
        assert_eq!(window_days(Some(now), &[], now), 1);
        assert_eq!(window_days(None, &[], now), 1);

        let first = DailyClicks {
            date: (now - Duration::days(9)).format("%Y-%m-%d").to_string(),
            clicks: 2,
        };
        assert_eq!(window_days(None, &[first], now), 10);
    }
}
