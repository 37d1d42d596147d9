use anyhow::{Context, Result};
use std::{str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./linkshort.db"
    pub database_url: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL used when reporting short links, e.g. "https://go.example.com".
    /// Never has a trailing slash.
    pub base_url: String,

    /// Operator account. Links created through the API are owned by it.
    pub admin_username: String,
    pub admin_password: String,

    /// How many hours a session token remains valid
    pub session_duration_hours: u64,

    /// Remote cache; the in-process cache is used when unset.
    pub redis_url: Option<String>,

    /// Upper bound for how long a resolved link stays cached.
    pub cache_ttl: Duration,

    /// Path to a `start_ip,end_ip,country` CSV. Countries read "unknown"
    /// when unset.
    pub ip_country_db: Option<String>,

    /// Requests still running after this are answered with 408.
    pub request_timeout: Duration,

    /// Comma-separated list of allowed CORS origins, or "*".
    pub cors_allow_origins: Vec<String>,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        let admin_password = std::env::var("ADMIN_PASSWORD")
            .context("ADMIN_PASSWORD must be set in the environment or .env file")?;

        if admin_password.trim().is_empty() {
            anyhow::bail!("ADMIN_PASSWORD must not be empty");
        }

        let port: u16 = parse_setting(
            "PORT",
            std::env::var("PORT").ok().as_deref(),
            3000,
            "a valid port number (1–65535)",
        )?;

        let session_duration_hours: u64 = parse_setting(
            "SESSION_DURATION_HOURS",
            std::env::var("SESSION_DURATION_HOURS").ok().as_deref(),
            24,
            "a whole number of hours",
        )?;

        let cache_ttl_secs: u64 = parse_setting(
            "CACHE_TTL_SECS",
            std::env::var("CACHE_TTL_SECS").ok().as_deref(),
            86_400,
            "a whole number of seconds",
        )?;

        let request_timeout_secs: u64 = parse_setting(
            "REQUEST_TIMEOUT_SECS",
            std::env::var("REQUEST_TIMEOUT_SECS").ok().as_deref(),
            15,
            "a whole number of seconds",
        )?;

        let base_url = std::env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./linkshort.db".into()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            base_url,
            admin_username: non_empty_var("ADMIN_USERNAME").unwrap_or_else(|| "admin".into()),
            admin_password,
            session_duration_hours,
            redis_url: non_empty_var("REDIS_URL"),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            ip_country_db: non_empty_var("IP_COUNTRY_DB"),
            request_timeout: Duration::from_secs(request_timeout_secs),
            cors_allow_origins: parse_origins(
                &std::env::var("CORS_ALLOW_ORIGINS").unwrap_or_else(|_| "*".into()),
            ),
        })
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: 3000,
            base_url: "http://sho.rt".into(),
            admin_username: "admin".into(),
            admin_password: "correct horse".into(),
            session_duration_hours: 1,
            redis_url: None,
            cache_ttl: Duration::from_secs(86_400),
            ip_country_db: None,
            request_timeout: Duration::from_secs(15),
            cors_allow_origins: vec!["*".into()],
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Parse a numeric setting, using `default` when it is unset or blank.
fn parse_setting<T: FromStr>(key: &str, raw: Option<&str>, default: T, expected: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .with_context(|| format!("{key} must be {expected}, got '{v}'")),
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_settings_default_or_fail_loudly() {
        assert_eq!(parse_setting::<u64>("SESSION_DURATION_HOURS", None, 24, "hours").unwrap(), 24);
        assert_eq!(parse_setting::<u64>("SESSION_DURATION_HOURS", Some(" "), 24, "hours").unwrap(), 24);
        assert_eq!(parse_setting::<u64>("SESSION_DURATION_HOURS", Some("48"), 24, "hours").unwrap(), 48);

        let err = parse_setting::<u64>("SESSION_DURATION_HOURS", Some("a day"), 24, "hours")
            .unwrap_err()
            .to_string();
        assert!(err.contains("SESSION_DURATION_HOURS"));
        assert!(parse_setting::<u16>("PORT", Some("70000"), 3000, "a port").is_err());
    }

    #[test]
    fn origins_are_trimmed_and_split() {
        assert_eq!(parse_origins("*"), vec!["*"]);
        assert_eq!(
            parse_origins(" https://a.example , ,https://b.example"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_origins("").is_empty());
    }
}
