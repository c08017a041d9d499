//! Database connection pool, migrations, and health check.
//!
//! The ledger lives in one SQLite file shared by every worker process.
//! WAL mode lets readers proceed while one writer commits; the busy timeout
//! makes a blocked writer wait and retry instead of failing immediately.

pub mod queue;

use crate::config::Config;
use crate::error::{Error, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;

/// Database handle. Owns the connection pool used by every store operation.
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (creating if absent) the database at `config.db_path`.
    pub async fn connect(config: &Config) -> Result<Self> {
        if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| Error::Resource {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        tracing::debug!(path = %config.db_path.display(), "opening ledger database");

        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Open and migrate in one step; what every command does first.
    pub async fn open(config: &Config) -> Result<Self> {
        let db = Self::connect(config).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    ///
    /// A single connection that never idles out, since each SQLite memory
    /// connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply the schema. Idempotent; already-applied migrations are skipped.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Round-trip a `SELECT 1`.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Current journal mode as reported by SQLite (`wal` for file databases).
    pub async fn journal_mode(&self) -> Result<String> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
