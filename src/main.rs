use std::{net::SocketAddr, sync::Arc};

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod cache;
mod config;
mod db;
mod error;
mod geo;
mod handlers;
mod models;
mod shortcode;

use auth::SessionStore;
use cache::LinkCache;
use db::{ClickRecorder, LinkResolver, SqliteStore};
use geo::CountryTable;

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: config::AppConfig,
    pub cache: Arc<dyn LinkCache>,
    /// Redirect lookups go through this seam rather than `db` directly.
    pub links: Arc<dyn LinkResolver>,
    pub clicks: Arc<dyn ClickRecorder>,
    pub sessions: SessionStore,
    /// Loaded once at startup, read-only afterwards.
    pub countries: Arc<CountryTable>,
}

// ── Router ─────────────────────────────────────────────────────────────────

pub fn app(state: Arc<AppState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(cors_layer(&state.config.cors_allow_origins));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route(
            "/links",
            get(handlers::links::list_links).post(handlers::links::create_link),
        )
        .route("/analytics", get(handlers::analytics::account_analytics))
        .route("/analytics/dashboard", get(handlers::analytics::dashboard))
        .route(
            "/links/:id",
            get(handlers::links::get_link).delete(handlers::links::delete_link),
        )
        // Short-link redirect: static routes above take priority
        .route("/:code", get(handlers::redirect::redirect))
        .with_state(state)
        .layer(middleware)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env; env vars may already be set, so a missing file is fine
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linkshort=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = config::AppConfig::from_env()?;
    tracing::info!("Starting linkshort on {}:{}", config.host, config.port);
    tracing::info!("Base URL: {}", config.base_url);

    // Open SQLite connection pool
    // CREATE the file if it doesn't exist yet
    let db = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(
            config
                .database_url
                .parse::<sqlx::sqlite::SqliteConnectOptions>()?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal),
        )
        .await?;

    // Run embedded migrations (files in migrations/)
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations applied");

    let countries = match config.ip_country_db.as_deref() {
        Some(path) => CountryTable::load(path)?,
        None => {
            tracing::warn!("IP_COUNTRY_DB not set; click countries will read 'unknown'");
            CountryTable::empty()
        }
    };
    if countries.is_empty() {
        tracing::warn!("IP country table has no usable ranges");
    }

    let cache = cache::from_config(config.redis_url.as_deref()).await;
    let store = Arc::new(SqliteStore::new(db.clone()));
    let sessions = SessionStore::new(config.session_duration_hours);

    let bind_addr = format!("{}:{}", config.host, config.port);

    let state = Arc::new(AppState {
        db,
        config,
        cache,
        links: store.clone(),
        clicks: store,
        sessions,
        countries: Arc::new(countries),
    });

    // ── Serve ──────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
