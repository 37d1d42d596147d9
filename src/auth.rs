use crate::{error::AppError, AppState};
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::CookieJar;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session_id";

// ── Session Store ──────────────────────────────────────────────────────────

struct Session {
    owner_id: String,
    created_at: Instant,
}

/// In-memory session store. Each entry maps an opaque token (UUID) to the
/// owner it was issued for. Tokens expire after `session_duration`.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    pub session_duration: Duration,
}

impl SessionStore {
    pub fn new(session_duration_hours: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            session_duration: Duration::from_secs(session_duration_hours.saturating_mul(3600)),
        }
    }

    /// Create a new session for `owner_id` and return its token.
    pub async fn create(&self, owner_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().await;
        // Opportunistically prune expired sessions on every login
        sessions.retain(|_, s| s.created_at.elapsed() < self.session_duration);
        sessions.insert(
            token.clone(),
            Session {
                owner_id: owner_id.to_owned(),
                created_at: Instant::now(),
            },
        );
        token
    }

    /// The owner behind `token`, if it exists and has not expired.
    pub async fn owner(&self, token: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        sessions
            .get(token)
            .filter(|s| s.created_at.elapsed() < self.session_duration)
            .map(|s| s.owner_id.clone())
    }

    /// Invalidate a specific session (logout).
    pub async fn remove(&self, token: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(token);
    }
}

/// Session token carried by a request: `Authorization: Bearer` first, then
/// the session cookie.
pub fn request_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned);

    bearer.or_else(|| {
        CookieJar::from_headers(&parts.headers)
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_owned())
    })
}

// ── AuthUser extractor ─────────────────────────────────────────────────────

/// Extractor that enforces authentication on any handler that includes it as
/// a parameter. Resolves to the owner id of the session; otherwise the
/// request is rejected with 401 and the handler never runs.
pub struct AuthUser {
    pub owner_id: String,
    pub token: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AppState>::from_ref(state);
        let token = request_token(parts).ok_or(AppError::Unauthorized)?;

        match state.sessions.owner(&token).await {
            Some(owner_id) => Ok(AuthUser { owner_id, token }),
            None => Err(AppError::Unauthorized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: (&str, &str)) -> Parts {
        Request::builder()
            .header(header.0, header.1)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[tokio::test]
    async fn sessions_resolve_to_owner_until_removed() {
        let store = SessionStore::new(1);
        let token = store.create("admin").await;

        assert_eq!(store.owner(&token).await.as_deref(), Some("admin"));
        assert_eq!(store.owner("bogus").await, None);

        store.remove(&token).await;
        assert_eq!(store.owner(&token).await, None);
    }

    #[tokio::test]
    async fn zero_duration_sessions_expire_immediately() {
        let store = SessionStore::new(0);
        let token = store.create("admin").await;
        assert_eq!(store.owner(&token).await, None);
    }

    #[tokio::test]
    async fn huge_durations_saturate() {
        let store = SessionStore::new(u64::MAX);
        assert_eq!(store.session_duration, Duration::from_secs(u64::MAX));

        let token = store.create("admin").await;
        assert_eq!(store.owner(&token).await.as_deref(), Some("admin"));
    }

    #[test]
    fn token_from_bearer_or_cookie() {
        assert_eq!(
            request_token(&parts(("authorization", "Bearer abc"))).as_deref(),
            Some("abc")
        );
        assert_eq!(
            request_token(&parts(("cookie", "session_id=xyz; theme=dark"))).as_deref(),
            Some("xyz")
        );
        assert_eq!(request_token(&parts(("authorization", "Basic abc"))), None);
    }
}
