use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub query_timeout: Duration,
    pub site_title: String,
}

impl Config {
    /// Reads `TODO_*` variables, after loading a `.env` file if one exists.
    pub fn from_env() -> Result<Self> {
        // A missing .env is fine; the defaults below cover every setting.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let timeout_ms: u64 = parse_or(&lookup, "TODO_QUERY_TIMEOUT_MS", 5_000)?;
        if timeout_ms == 0 {
            bail!("invalid TODO_QUERY_TIMEOUT_MS: must be greater than zero");
        }
        Ok(Self {
            database_path: lookup("TODO_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("todos.db")),
            listen_addr: parse_or(
                &lookup,
                "TODO_LISTEN_ADDR",
                SocketAddr::from(([0, 0, 0, 0], 8080)),
            )?,
            query_timeout: Duration::from_millis(timeout_ms),
            site_title: lookup("TODO_SITE_TITLE").unwrap_or_else(|| "Todos".to_string()),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}
