//! SQLite storage for devices and links.

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use linkdrop_core::{DeviceId, LinkId, LinkRecord, LinkSink, SinkError, UserId};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Device {
    pub id: DeviceId,
    pub user_id: UserId,
    pub name: String,
    pub last_seen: Option<DateTime<Utc>>,
}

/// SQLite-backed storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        // A plain filename, never parsed as a URL.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        info!(path = %path.display(), "Opened database");
        Ok(storage)
    }

    /// Create an in-memory database (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // One connection: every connection to ":memory:" is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                last_seen TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                from_device_id INTEGER NOT NULL,
                to_device_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_devices_user ON devices(user_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_user ON links(user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Register a device for `user`.
    pub async fn register_device(&self, user: UserId, name: &str) -> Result<Device, StorageError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::Invalid("device name"));
        }

        let device = sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices (user_id, name, last_seen)
            VALUES (?1, ?2, ?3)
            RETURNING id, user_id, name, last_seen
            "#,
        )
        .bind(user)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        debug!(user, device = device.id, "Device registered");
        Ok(device)
    }

    /// All devices of `user`, oldest first.
    pub async fn list_devices(&self, user: UserId) -> Result<Vec<Device>, StorageError> {
        let devices = sqlx::query_as::<_, Device>(
            "SELECT id, user_id, name, last_seen FROM devices WHERE user_id = ?1 ORDER BY id",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        Ok(devices)
    }

    /// Number of stored links for `user`.
    pub async fn count_links(&self, user: UserId) -> Result<i64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM links WHERE user_id = ?1")
            .bind(user)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_link(&self, link: &LinkRecord) -> Result<LinkId, StorageError> {
        let id: LinkId = sqlx::query_scalar(
            r#"
            INSERT INTO links (user_id, from_device_id, to_device_id, url, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id
            "#,
        )
        .bind(link.user_id)
        .bind(link.from_device_id)
        .bind(link.to_device_id)
        .bind(&link.url)
        .bind(link.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update_last_seen(&self, device: DeviceId, user: UserId) -> Result<u64, StorageError> {
        let result = sqlx::query("UPDATE devices SET last_seen = ?1 WHERE id = ?2 AND user_id = ?3")
            .bind(Utc::now())
            .bind(device)
            .bind(user)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LinkSink for SqliteStorage {
    async fn record_link(&self, link: &LinkRecord) -> Result<LinkId, SinkError> {
        Ok(self.insert_link(link).await?)
    }

    async fn touch_device_last_seen(
        &self,
        device: DeviceId,
        user: UserId,
    ) -> Result<(), SinkError> {
        let updated = self.update_last_seen(device, user).await?;
        if updated == 0 {
            // Sessions are keyed by id alone; the row may not exist.
            debug!(user, device, "No device row to touch");
        }
        Ok(())
    }
}
