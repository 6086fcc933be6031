use anyhow::{bail, Context, Result};
use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use crate::models::ActiveWindow;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// `None` means build the connection from the `PG*` variables.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub poll_interval: Duration,
    pub active_window: ActiveWindow,
    pub query_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port: u16 = parse_var(&lookup, "PORT", DEFAULT_PORT)?;
        let poll_ms: u64 = parse_var(&lookup, "POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let timeout_ms: u64 = parse_var(&lookup, "QUERY_TIMEOUT_MS", DEFAULT_QUERY_TIMEOUT_MS)?;
        let window_hours: i64 =
            parse_var(&lookup, "ACTIVE_WINDOW_HOURS", ActiveWindow::DEFAULT_HOURS)?;
        let max_connections: u32 =
            parse_var(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;

        if poll_ms == 0 {
            bail!("POLL_INTERVAL_MS must be greater than zero");
        }
        if timeout_ms == 0 {
            bail!("QUERY_TIMEOUT_MS must be greater than zero");
        }
        if max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be greater than zero");
        }
        if window_hours <= 0 || window_hours > i64::from(i32::MAX) {
            bail!("ACTIVE_WINDOW_HOURS must be between 1 and {}", i32::MAX);
        }

        Ok(Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            max_connections,
            poll_interval: Duration::from_millis(poll_ms),
            active_window: ActiveWindow::hours(window_hours),
            query_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        _ => Ok(default),
    }
}
