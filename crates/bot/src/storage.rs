use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// Persisted user profile.
///
/// `premium` and `encrypted_credential` are only ever written by the premium
/// operations; rows are never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: i64,
    pub username: Option<String>,
    pub premium: bool,
    pub encrypted_credential: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: i64, username: Option<String>) -> Self {
        Self {
            user_id,
            username,
            premium: false,
            encrypted_credential: None,
        }
    }
}

/// Audit-only record of an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub user_id: i64,
    pub file_ref: String,
    pub file_type: String,
    pub file_size: u64,
    pub timestamp: DateTime<Utc>,
}

/// SQLite-backed persistence for the `users` and `files` collections.
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open the database and bootstrap the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open database: {database_url}"))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                premium INTEGER NOT NULL DEFAULT 0,
                encrypted_credential TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create users table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                file_ref TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create files table")?;

        Ok(())
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT user_id, username, premium, encrypted_credential
             FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load user profile")?;

        Ok(row.map(|r| UserProfile {
            user_id: r.get(0),
            username: r.get(1),
            premium: r.get::<i64, _>(2) != 0,
            encrypted_credential: r.get(3),
        }))
    }

    pub async fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, username, premium, encrypted_credential)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 username = excluded.username,
                 premium = excluded.premium,
                 encrypted_credential = excluded.encrypted_credential",
        )
        .bind(user.user_id)
        .bind(&user.username)
        .bind(user.premium as i64)
        .bind(&user.encrypted_credential)
        .execute(&self.pool)
        .await
        .context("Failed to upsert user profile")?;
        Ok(())
    }

    /// Create a profile row on first contact. An existing row keeps its
    /// premium flag and credential; only a missing username is filled in.
    pub async fn ensure_user(&self, user_id: i64, username: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, username, premium)
             VALUES (?, ?, 0)
             ON CONFLICT(user_id) DO UPDATE SET
                 username = COALESCE(users.username, excluded.username)",
        )
        .bind(user_id)
        .bind(username)
        .execute(&self.pool)
        .await
        .context("Failed to ensure user profile")?;
        Ok(())
    }

    pub async fn count_users(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM users").await
    }

    pub async fn count_premium_users(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM users WHERE premium = 1").await
    }

    pub async fn count_files(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM files").await
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let row = sqlx::query(sql)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count rows")?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    pub async fn insert_file(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO files (user_id, file_ref, file_type, file_size, timestamp)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.user_id)
        .bind(&record.file_ref)
        .bind(&record.file_type)
        .bind(record.file_size as i64)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to insert file record")?;
        Ok(())
    }

    /// Delete file records older than `cutoff`. Returns the number removed.
    pub async fn delete_files_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM files WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to delete old file records")?;
        Ok(result.rows_affected())
    }

    /// Every known user id, for broadcast.
    pub async fn user_ids(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT user_id FROM users ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list users")?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }
}
