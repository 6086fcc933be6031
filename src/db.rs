use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};

use crate::config::Config;

pub type Db = Pool<Postgres>;

/// Build the shared pool. Connections are opened lazily so the service comes
/// up (and keeps ticking) while the database is unreachable.
pub fn connect(config: &Config) -> Result<Db> {
    // PgConnectOptions::new() reads PGHOST, PGPORT, PGDATABASE, PGUSER, PGPASSWORD.
    let options = match &config.database_url {
        Some(url) => url.parse::<PgConnectOptions>().context("invalid DATABASE_URL")?,
        None => PgConnectOptions::new(),
    };
    Ok(PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.query_timeout)
        .connect_lazy_with(options))
}
