use crate::{db, AppState};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::{sync::Arc, time::Duration};

pub mod analytics;
pub mod auth;
pub mod links;
pub mod redirect;

/// Success envelope shared by the JSON API.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn respond<T: Serialize>(message: &'static str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        message,
        data: Some(data),
    })
}

/// GET /health
///
/// 200 when the database answers within a second, 503 otherwise.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let healthy = matches!(
        tokio::time::timeout(Duration::from_secs(1), db::ping(&state.db)).await,
        Ok(Ok(()))
    );

    let (status, message) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "db unavailable")
    };

    (
        status,
        Json(ApiResponse::<()> {
            message,
            data: None,
        }),
    )
}


#[cfg(test)]
mod tests {
    use super::testing::{body_json, TestApp};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn health_reports_ok() {
        let app = TestApp::new().await;
        let res = app.get("/health").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["message"], "ok");
    }

    #[tokio::test]
    async fn health_reports_closed_database() {
        let app = TestApp::new().await;
        app.pool.close().await;
        let res = app.get("/health").await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
