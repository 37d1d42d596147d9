use crate::{
    cache::LinkCache,
    db::{ClickRecorder, LinkResolver},
    error::AppError,
    geo::CountryTable,
    models::{ClickLogEntry, ResolvedLink},
    AppState,
};
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use url::Url;
use woothee::parser::Parser;

const SOCIAL_MEDIA: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "linkedin.com",
    "pinterest.com",
    "reddit.com",
    "tiktok.com",
    "youtube.com",
];

const SEARCH_ENGINES: &[&str] = &["google.com", "bing.com", "yahoo.com", "duckduckgo.com"];

/// GET /:code
///
/// 1. Enrich the click from request headers (pure, no I/O).
/// 2. Ask the cache. A hit records the click and redirects; a miss or a
///    cache error falls through to the database.
/// 3. Resolve in the database. Unknown or expired → 404 with no click
///    recorded. Found → populate the cache from a detached task, record the
///    click, redirect.
///
/// Click recording is best-effort on both paths and never fails the redirect.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    // ── 1. Enrich ──────────────────────────────────────────────────────────
    let click = enrich(&code, &headers, addr, &state.countries);

    // ── 2. Cache ───────────────────────────────────────────────────────────
    if let Some(url) = cached_url(state.cache.as_ref(), &code).await {
        record_click(state.clicks.as_ref(), &click).await;
        return Ok(moved_permanently(&url));
    }

    // ── 3. Database ────────────────────────────────────────────────────────
    let Some(link) = state.links.resolve(&code).await? else {
        tracing::debug!("Short code '{}' not found", code);
        return Err(AppError::NotFound("link not found"));
    };

    populate_cache(
        state.cache.clone(),
        state.links.clone(),
        code,
        &link,
        state.config.cache_ttl,
    );
    record_click(state.clicks.as_ref(), &click).await;

    Ok(moved_permanently(&link.original_url))
}

fn moved_permanently(url: &str) -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, url)]).into_response()
}

/// A usable cached URL, or `None` for a miss. Cache errors are logged and
/// read as a miss.
async fn cached_url(cache: &dyn LinkCache, code: &str) -> Option<String> {
    match cache.get(code).await {
        Ok(Some(url)) if !url.is_empty() => Some(url),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(
                "Cache lookup for '{}' failed, falling back to database: {}",
                code,
                e
            );
            None
        }
    }
}

/// Write the resolved URL into the cache without holding up the response.
///
/// The task is spawned onto the runtime rather than awaited, so it outlives
/// the request even if the client disconnects. After the write the code is
/// resolved again: a delete that landed between the first lookup and the
/// write must not leave the entry behind, so it is evicted when the link is
/// gone or the check fails.
fn populate_cache(
    cache: Arc<dyn LinkCache>,
    links: Arc<dyn LinkResolver>,
    code: String,
    link: &ResolvedLink,
    max_ttl: Duration,
) {
    let Some(ttl) = cache_ttl(link.expired_at, max_ttl, Utc::now()) else {
        return;
    };
    let url = link.original_url.clone();

    tokio::spawn(async move {
        if let Err(e) = cache.set(&code, &url, ttl).await {
            tracing::warn!("Failed to cache short code '{}': {}", code, e);
            return;
        }

        let still_live = match links.resolve(&code).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!("Could not re-check '{}' after caching: {}", code, e);
                false
            }
        };
        if still_live {
            return;
        }

        tracing::debug!("Short code '{}' vanished while caching, evicting", code);
        if let Err(e) = cache.invalidate(&code).await {
            tracing::warn!("Failed to evict short code '{}': {}", code, e);
        }
    });
}

/// How long a resolved link may stay cached: the configured TTL, cut short
/// by the link's own expiry. `None` means do not cache.
fn cache_ttl(
    expired_at: Option<DateTime<Utc>>,
    max_ttl: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let ttl = match expired_at {
        None => max_ttl,
        Some(at) => (at - now).to_std().ok()?.min(max_ttl),
    };
    (!ttl.is_zero()).then_some(ttl)
}

/// Append the click, logging and discarding any failure.
async fn record_click(clicks: &dyn ClickRecorder, entry: &ClickLogEntry) {
    if let Err(e) = clicks.append(entry).await {
        tracing::warn!("Failed to record click for '{}': {}", entry.code, e);
    }
}

// ── Enrichment ─────────────────────────────────────────────────────────────

fn enrich(
    code: &str,
    headers: &HeaderMap,
    addr: SocketAddr,
    countries: &CountryTable,
) -> ClickLogEntry {
    let ip = extract_ip(headers, addr);

    let user_agent = header_str(headers, header::USER_AGENT);
    let referrer = header_str(headers, header::REFERER);

    let (browser, device_type) = parse_user_agent(user_agent.as_deref());
    let country = countries.lookup(&ip).unwrap_or("unknown").to_owned();
    let traffic_source = traffic_source(referrer.as_deref());

    ClickLogEntry {
        code: code.to_owned(),
        ip_address: Some(ip),
        user_agent,
        referrer,
        device_type: device_type.to_owned(),
        browser,
        country,
        traffic_source,
        clicked_at: Utc::now(),
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Determine the real client IP, preferring common proxy headers.
fn extract_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    // X-Forwarded-For can be a comma-separated list; take the first entry.
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = xff.split(',').next().map(str::trim) {
            if !ip.is_empty() {
                return ip.to_owned();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_owned();
        }
    }

    addr.ip().to_string()
}

/// Parse a User-Agent string using woothee and return
/// `(browser_name, device_type)` where the device is one of `mobile`,
/// `tablet` or `desktop`.
fn parse_user_agent(ua: Option<&str>) -> (String, &'static str) {
    let Some(ua) = ua else {
        return ("unknown".to_owned(), "desktop");
    };

    let parsed = Parser::new().parse(ua);
    let browser = parsed
        .as_ref()
        .map(|r| r.name)
        .filter(|name| !name.is_empty() && *name != "UNKNOWN")
        .unwrap_or("unknown")
        .to_owned();
    let category = parsed.as_ref().map(|r| r.category);

    (browser, device_type(ua, category))
}

// woothee files tablets under "smartphone", so tablet markers are checked
// on the raw string first.
fn device_type(ua: &str, category: Option<&str>) -> &'static str {
    let lower = ua.to_ascii_lowercase();
    if lower.contains("ipad")
        || lower.contains("tablet")
        || (lower.contains("android") && !lower.contains("mobile"))
    {
        return "tablet";
    }

    match category {
        Some("smartphone") | Some("mobilephone") => "mobile",
        _ => "desktop",
    }
}

/// Classify the referrer: `direct` when absent, `unknown` when it has no
/// parseable host, a well-known social or search domain when the host
/// belongs to one, otherwise the bare host.
fn traffic_source(referrer: Option<&str>) -> String {
    let Some(referrer) = referrer else {
        return "direct".to_owned();
    };

    let host = match Url::parse(referrer) {
        Ok(url) => match url.host_str() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => return "unknown".to_owned(),
        },
        Err(_) => return "unknown".to_owned(),
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);

    SOCIAL_MEDIA
        .iter()
        .chain(SEARCH_ENGINES)
        .find(|domain| host == **domain || host.ends_with(&format!(".{domain}")))
        .map(|domain| (*domain).to_owned())
        .unwrap_or_else(|| host.to_owned())
}
