//! SQLite connection pools and ledger migrations

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Open a pool for a `sqlite:` URL, creating the database file if needed
///
/// In-memory databases live and die with their connection, so they get a
/// single connection that is never recycled.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !is_in_memory(url) {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool_options = if is_in_memory(url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    tracing::debug!(url, "opening SQLite pool");
    pool_options.connect_with(options).await
}

/// Apply the embedded ledger migrations
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
