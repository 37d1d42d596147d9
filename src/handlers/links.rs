use crate::{
    auth::AuthUser,
    db,
    error::AppError,
    handlers::{analytics::breakdown, respond},
    models::{AnalyticsSummary, Link, LinkOrder, LinkWithStats, NewLink},
    shortcode, AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Generated codes tried before creation gives up with a conflict.
const MAX_CODE_ATTEMPTS: usize = 5;
const MAX_PAGE_SIZE: i64 = 100;
const ANALYTICS_SAMPLE: i64 = 500;
/// Path segments already claimed by other routes.
const RESERVED_CODES: &[&str] = &["health", "links", "auth", "analytics"];

// ── Request / response types ───────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateLinkRequest {
    original_url: String,
    custom_short_code: Option<String>,
    expired_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct ListParams {
    page: Option<i64>,
    limit: Option<i64>,
    order_by: Option<LinkOrder>,
}

#[derive(Serialize)]
pub struct LinkView<T: Serialize> {
    #[serde(flatten)]
    link: T,
    short_url: String,
}

// ── Handlers ───────────────────────────────────────────────────────────────

/// GET /links?page=&limit=&order_by=
pub async fn list_links(
    auth: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Response, AppError> {
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(10);
    if page < 1 {
        return Err(AppError::BadRequest("page must be at least 1".into()));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let offset = (page - 1)
        .checked_mul(limit)
        .ok_or_else(|| AppError::BadRequest("page is out of range".into()))?;

    let links = db::list_links(
        &state.db,
        &auth.owner_id,
        limit,
        offset,
        params.order_by.unwrap_or_default(),
    )
    .await?;

    let views: Vec<LinkView<LinkWithStats>> = links
        .into_iter()
        .map(|stats| link_view(&state, stats))
        .collect();

    Ok(respond("successfully get links", views).into_response())
}

/// POST /links
pub async fn create_link(
    auth: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateLinkRequest>,
) -> Result<Response, AppError> {
    let original_url = validate_url(&body.original_url)?;

    let custom_short_code = body
        .custom_short_code
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(validate_custom_code)
        .transpose()?;

    if let Some(at) = body.expired_at {
        if at <= Utc::now() {
            return Err(AppError::BadRequest(
                "expired_at must be in the future".into(),
            ));
        }
    }

    let new = NewLink {
        original_url,
        short_code: String::new(),
        custom_short_code,
        owner_id: auth.owner_id,
        expired_at: body.expired_at,
    };

    let link = insert_link(&state.db, new, shortcode::generate).await?;
    tracing::info!(
        "Created link {} ({}) -> {}",
        link.id,
        link.public_code(),
        link.original_url
    );

    let view = LinkView {
        short_url: short_url(&state, &link),
        link,
    };
    Ok((
        StatusCode::CREATED,
        respond("successfully insert new link", view),
    )
        .into_response())
}

/// GET /links/:id
pub async fn get_link(
    auth: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let link = db::get_link(&state.db, &auth.owner_id, id)
        .await?
        .ok_or(AppError::NotFound("resource not found"))?;

    let (total_clicks, clicks) = db::click_history(&state.db, &link, ANALYTICS_SAMPLE).await?;

    let sample = clicks.len() as i64;
    let summary = AnalyticsSummary {
        short_url: short_url(&state, &link),
        total_clicks,
        devices: breakdown(clicks.iter().map(|c| c.device_type.as_str()), sample),
        browsers: breakdown(clicks.iter().map(|c| c.browser.as_str()), sample),
        countries: breakdown(clicks.iter().map(|c| c.country.as_str()), sample),
        traffic_sources: breakdown(clicks.iter().map(|c| c.traffic_source.as_str()), sample),
        recent_clicks: clicks,
        link,
    };

    Ok(respond("successfully get link", summary).into_response())
}

/// DELETE /links/:id
pub async fn delete_link(
    auth: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    // Fetch the link first so we can evict its codes from the cache
    let link = db::get_link(&state.db, &auth.owner_id, id)
        .await?
        .ok_or(AppError::NotFound("resource not found"))?;

    if !db::delete_link(&state.db, &auth.owner_id, id).await? {
        return Err(AppError::NotFound("resource not found"));
    }

    let codes = std::iter::once(link.short_code.as_str())
        .chain(link.custom_short_code.as_deref());
    for code in codes {
        if let Err(e) = state.cache.invalidate(code).await {
            tracing::warn!("Failed to evict '{}' from cache: {}", code, e);
        }
    }

    tracing::info!("Deleted link {} ({})", link.id, link.public_code());
    Ok(StatusCode::NO_CONTENT)
}

// ── Private helpers ────────────────────────────────────────────────────────

pub(crate) fn link_view(state: &AppState, stats: LinkWithStats) -> LinkView<LinkWithStats> {
    LinkView {
        short_url: short_url(state, &stats.link),
        link: stats,
    }
}

fn short_url(state: &AppState, link: &Link) -> String {
    format!("{}/{}", state.config.base_url, link.public_code())
}

fn validate_url(raw: &str) -> Result<String, AppError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(AppError::BadRequest("original_url must not be empty".into()));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(AppError::BadRequest(
            "original_url must start with http:// or https://".into(),
        ));
    }
    url::Url::parse(url)
        .map_err(|e| AppError::BadRequest(format!("original_url is not a valid URL: {e}")))?;

    Ok(url.to_owned())
}

fn validate_custom_code(code: &str) -> Result<String, AppError> {
    if !(3..=32).contains(&code.len()) {
        return Err(AppError::BadRequest(
            "custom_short_code must be 3 to 32 characters".into(),
        ));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::BadRequest(
            "custom_short_code may only contain letters, numbers, hyphens and underscores".into(),
        ));
    }
    if RESERVED_CODES.contains(&code.to_ascii_lowercase().as_str()) {
        return Err(AppError::BadRequest(format!(
            "custom_short_code '{code}' is reserved"
        )));
    }

    Ok(code.to_owned())
}

/// Insert `new` under a freshly generated short code.
///
/// A generated code that is already taken (seen up front or reported by the
/// UNIQUE constraint) is replaced and retried, up to `MAX_CODE_ATTEMPTS`.
/// A taken custom code is a conflict straight away.
async fn insert_link(
    pool: &SqlitePool,
    mut new: NewLink,
    mut generate: impl FnMut() -> String,
) -> Result<Link, AppError> {
    const CUSTOM_TAKEN: &str = "custom short code is already taken";

    if let Some(custom) = new.custom_short_code.as_deref() {
        if db::code_in_use(pool, custom).await? {
            return Err(AppError::Conflict(CUSTOM_TAKEN.into()));
        }
    }

    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let code = generate();
        if new.custom_short_code.as_deref() == Some(code.as_str())
            || db::code_in_use(pool, &code).await?
        {
            tracing::debug!("Generated code '{}' already in use (attempt {})", code, attempt);
            continue;
        }
        new.short_code = code;

        match db::create_link(pool, &new).await {
            Ok(link) => return Ok(link),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                if e.message().contains("custom_short_code") {
                    return Err(AppError::Conflict(CUSTOM_TAKEN.into()));
                }
                tracing::warn!(
                    "Short code '{}' collided on insert (attempt {})",
                    new.short_code,
                    attempt
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Conflict(
        "could not allocate a unique short code, try again".into(),
    ))
}
