use crate::{
    auth::{AuthUser, SESSION_COOKIE},
    error::AppError,
    handlers::{respond, ApiResponse},
    AppState,
};
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    token: String,
    expires_in: u64,
}

/// POST /auth/login
///
/// Issues an opaque session token, returned in the body for `Bearer` use and
/// also set as the session cookie.
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let config = &state.config;
    if body.username != config.admin_username || body.password != config.admin_password {
        // Use a small artificial delay to blunt brute-force attempts.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        return Err(AppError::Unauthorized);
    }

    let token = state.sessions.create(&config.admin_username).await;
    let expires_in = state.sessions.session_duration.as_secs();

    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(i64::try_from(expires_in).unwrap_or(i64::MAX)))
        .build();

    tracing::info!("Session opened for '{}'", config.admin_username);
    Ok((
        jar.add(cookie),
        respond("successfully logged in", LoginResponse { token, expires_in }),
    )
        .into_response())
}

/// POST /auth/logout
pub async fn logout(
    auth: AuthUser,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Response {
    state.sessions.remove(&auth.token).await;

    let removal = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(time::Duration::seconds(0))
        .build();

    (
        jar.add(removal),
        Json(ApiResponse::<()> {
            message: "successfully logged out",
            data: None,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use crate::handlers::testing::{body_json, TestApp};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::json;

    fn login_request(username: &str, password: &str) -> Request<Body> {
        Request::post("/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "username": username, "password": password }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn login_then_logout() {
        let app = TestApp::new().await;
        let config = app.state.config.clone();

        let res = app
            .send(login_request(&config.admin_username, &config.admin_password))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(header::SET_COOKIE).is_some());
        let token = body_json(res).await["data"]["token"]
            .as_str()
            .unwrap()
            .to_owned();

        let authed = |uri: &str, method: &str| {
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap()
        };

        assert_eq!(app.send(authed("/links", "GET")).await.status(), StatusCode::OK);
        assert_eq!(
            app.send(authed("/auth/logout", "POST")).await.status(),
            StatusCode::OK
        );
        assert_eq!(
            app.send(authed("/links", "GET")).await.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let app = TestApp::new().await;
        let res = app.send(login_request("admin", "wrong")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(res.headers().get(header::SET_COOKIE).is_none());
    }
}
