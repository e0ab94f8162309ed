mod reminder;
mod subscriber;

use crate::prelude::*;
use crate::Result;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

pub(crate) use reminder::*;
pub(crate) use subscriber::*;

#[derive(Debug, Deserialize)]
pub(crate) struct Config {
    #[serde(default = "default_database_url")]
    pub(crate) url: String,

    #[serde(default = "default_database_pool_size")]
    pub(crate) pool_size: u32,
}

fn default_database_url() -> String {
    "sqlite://data/users.db".to_owned()
}

fn default_database_pool_size() -> u32 {
    // SQLite serializes the writers anyway, so a big pool doesn't help
    4
}

/// Most likely unrecoverable errors from database communication layer
#[derive(Debug, thiserror::Error)]
pub(crate) enum DbError {
    #[error("Failed to connect to the database")]
    Connect { source: sqlx::Error },

    #[error("Failed to migrate the database")]
    Migrate { source: sqlx::migrate::MigrateError },

    #[error("Database query failed")]
    Query {
        #[from]
        source: sqlx::Error,
    },
}

/// Repositories that share the same connection pool
pub(crate) struct Database {
    pub(crate) subscribers: SubscriberRepo,
    pub(crate) reminders: ReminderRepo,
}

pub(crate) async fn init(config: Config) -> Result<Database> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(err_ctx!(DbError::Connect))?
        .create_if_missing(true);

    // `get_filename()` takes the options by value
    let file = options.clone().get_filename().to_path_buf();
    if let Some(dir) = file.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs_err::tokio::create_dir_all(dir).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.pool_size)
        // Verify that the connection is working early.
        // The connection created here can also be reused by the migrations.
        .connect_with(options)
        .await
        .map_err(err_ctx!(DbError::Connect))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(err_ctx!(DbError::Migrate))?;

    info!(url = %config.url, "Database is ready");

    Ok(Database {
        subscribers: SubscriberRepo::new(pool.clone()),
        reminders: ReminderRepo::new(pool),
    })
}
