//! PostgreSQL connection setup
//!
//! Only used when `DATABASE_URL` is configured; without it notes live in
//! memory. [`connect_note_store`] is the single entry point the server uses.

use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};

use super::repositories::{NoteRepository, NoteRepositoryError};

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    /// Every open socket may hold a save in flight, so keep this generous
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl DbConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to reset note locks: {0}")]
    LockReset(#[from] NoteRepositoryError),
}

pub async fn create_pool(config: &DbConfig) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(&config.database_url)
        .await?;

    Ok(pool)
}

/// Connect, migrate the notes table and drop lock columns left behind by a
/// previous process. Locks only ever live in this process's memory.
pub async fn connect_note_store(config: &DbConfig) -> Result<NoteRepository, DbError> {
    let pool = create_pool(config).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations completed successfully");

    let repository = NoteRepository::new(pool);
    let cleared = repository.clear_stale_locks().await?;
    if cleared > 0 {
        tracing::info!(cleared, "Cleared stale note locks");
    }

    Ok(repository)
}
