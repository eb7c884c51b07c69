use std::time::Duration;

use anyhow::{Context, Result};

use crate::codegen;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./linkbrief.db".
    /// The literal "memory:" selects the in-process store (nothing persists).
    pub database_url: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL used when building short links, e.g. "https://go.example.com".
    /// Never has a trailing slash.
    pub base_url: String,

    /// Where visitors land when a short code does not resolve, and where "/"
    /// sends them. `None` keeps them on this service's own root.
    pub home_url: Option<String>,

    /// Length of generated short codes
    pub code_length: usize,

    /// How many generated codes are tried before allocation gives up
    pub max_allocation_attempts: u32,

    /// Upper bound on how long a redirect waits for click recording
    pub record_timeout: Duration,

    /// Default viewer offset (minutes east of UTC) for bucketing clicks by date
    pub analytics_utc_offset_minutes: i32,

    /// HS256 secret shared with the auth provider. Without it every request
    /// is treated as a guest.
    pub jwt_secret: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse::<u16>()
            .context("PORT must be a valid port number (1–65535)")?;

        let base_url = std::env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();

        let home_url = non_empty_var("HOME_URL");
        if let Some(home) = &home_url {
            if home.chars().any(|c| c.is_ascii_control()) {
                anyhow::bail!("HOME_URL must not contain control characters");
            }
        }

        let code_length = std::env::var("SHORT_CODE_LENGTH")
            .unwrap_or_else(|_| codegen::DEFAULT_CODE_LENGTH.to_string())
            .parse::<usize>()
            .context("SHORT_CODE_LENGTH must be a positive integer")?;
        if code_length == 0 {
            anyhow::bail!("SHORT_CODE_LENGTH must be at least 1");
        }

        let max_allocation_attempts = std::env::var("MAX_ALLOCATION_ATTEMPTS")
            .unwrap_or_else(|_| "10".into())
            .parse::<u32>()
            .context("MAX_ALLOCATION_ATTEMPTS must be a positive integer")?;
        if max_allocation_attempts == 0 {
            anyhow::bail!("MAX_ALLOCATION_ATTEMPTS must be at least 1");
        }

        let record_timeout_ms = std::env::var("RECORD_TIMEOUT_MS")
            .unwrap_or_else(|_| "2000".into())
            .parse::<u64>()
            .context("RECORD_TIMEOUT_MS must be a number of milliseconds")?;

        let analytics_utc_offset_minutes = std::env::var("ANALYTICS_UTC_OFFSET_MINUTES")
            .unwrap_or_else(|_| "0".into())
            .parse::<i32>()
            .context("ANALYTICS_UTC_OFFSET_MINUTES must be an integer")?;
        if analytics_utc_offset_minutes.abs() >= 24 * 60 {
            anyhow::bail!("ANALYTICS_UTC_OFFSET_MINUTES must be within ±1439");
        }

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./linkbrief.db".into()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            base_url,
            home_url,
            code_length,
            max_allocation_attempts,
            record_timeout: Duration::from_millis(record_timeout_ms),
            analytics_utc_offset_minutes,
            jwt_secret: non_empty_var("AUTH_JWT_SECRET"),
        })
    }

    /// Redirect target for visitors whose short code could not be served.
    pub fn home(&self) -> &str {
        self.home_url.as_deref().unwrap_or("/")
    }

    /// Full public URL for a short code.
    pub fn short_url(&self, short_code: &str) -> String {
        format!("{}/r/{}", self.base_url, short_code)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == "memory:"
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
impl AppConfig {
    /// Defaults used by tests; no environment involved.
    pub fn for_tests() -> Self {
        Self {
            database_url: "memory:".into(),
            host: "127.0.0.1".into(),
            port: 3000,
            base_url: "http://localhost:3000".into(),
            home_url: None,
            code_length: codegen::DEFAULT_CODE_LENGTH,
            max_allocation_attempts: 10,
            record_timeout: Duration::from_millis(500),
            analytics_utc_offset_minutes: 0,
            jwt_secret: Some("test-secret".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_url_uses_redirect_prefix() {
        let config = AppConfig::for_tests();
        assert_eq!(config.short_url("abc123"), "http://localhost:3000/r/abc123");
    }

    #[test]
    fn home_falls_back_to_root() {
        let mut config = AppConfig::for_tests();
        assert_eq!(config.home(), "/");

        config.home_url = Some("https://example.com".into());
        assert_eq!(config.home(), "https://example.com");
    }
}
