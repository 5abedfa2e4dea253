use std::env;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Placeholder JWT secrets that should never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: String,
    pub host: String,
    pub port: u16,
    pub posts_per_page: u32,
    pub public_url: String,
    /// Unset disables search; `memory` selects the in-process index.
    pub elasticsearch_url: Option<String>,
    pub ms_translator_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-me".into(),
            db_path: "blog.db".into(),
            host: "0.0.0.0".into(),
            port: 5000,
            posts_per_page: 25,
            public_url: "http://localhost:5000".into(),
            elasticsearch_url: None,
            ms_translator_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let jwt_secret = env::var("BLOG_JWT_SECRET").unwrap_or(defaults.jwt_secret);
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("BLOG_JWT_SECRET is unset or a placeholder; tokens are forgeable");
        }

        Ok(Self {
            jwt_secret,
            db_path: env::var("BLOG_DB_PATH").unwrap_or(defaults.db_path),
            host: env::var("BLOG_HOST").unwrap_or(defaults.host),
            port: parse_or("BLOG_PORT", defaults.port)?,
            posts_per_page: parse_or("BLOG_POSTS_PER_PAGE", defaults.posts_per_page)?,
            public_url: env::var("BLOG_PUBLIC_URL").unwrap_or(defaults.public_url),
            elasticsearch_url: non_empty("ELASTICSEARCH_URL"),
            ms_translator_key: non_empty("MS_TRANSLATOR_KEY"),
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {key} value: {raw}")),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
