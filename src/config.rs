use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub cookie_secure: bool,
}

/// Lifetimes of the single-use links sent by e-mail.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub confirm_ttl_hours: i64,
    pub reset_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Public origin used to build links in outgoing mail.
    pub base_url: String,
    pub session: SessionConfig,
    pub tokens: TokenConfig,
    pub mail_from: String,
    /// Without SMTP settings mail is only logged.
    pub smtp: Option<SmtpConfig>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let session = SessionConfig {
            secret: std::env::var("SESSION_SECRET")?,
            issuer: std::env::var("SESSION_ISSUER").unwrap_or_else(|_| "authgate".into()),
            audience: std::env::var("SESSION_AUDIENCE")
                .unwrap_or_else(|_| "authgate-web".into()),
            ttl_minutes: env_or("SESSION_TTL_MINUTES", 60 * 12),
            cookie_secure: env_or("SESSION_COOKIE_SECURE", false),
        };
        let tokens = TokenConfig {
            confirm_ttl_hours: env_or("CONFIRM_TTL_HOURS", 24),
            reset_ttl_minutes: env_or("RESET_TTL_MINUTES", 60),
        };
        let smtp = std::env::var("SMTP_HOST").ok().map(|host| SmtpConfig {
            host,
            port: env_or("SMTP_PORT", 25),
            username: std::env::var("SMTP_USERNAME").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
        });
        Ok(Self {
            database_url,
            base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            session,
            tokens,
            mail_from: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "no-reply@authgate.local".into()),
            smtp,
        })
    }

    /// Absolute URL for a path on this service.
    pub fn link(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
