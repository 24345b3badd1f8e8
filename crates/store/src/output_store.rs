//! Optional secondary backend for large stdout/stderr blobs: an output
//! store may optionally be configured to receive only the large
//! stdout/stderr blobs, with the main store holding a reference.
//!
//! Modeled as a capability set — no runtime class-graph introspection —
//! so the primary store can route payloads to whichever concrete
//! backend `[outputstore]` names without knowing its type.

use async_trait::async_trait;
use sqlx::{PgPool, Row, SqlitePool};

use crate::error::StoreError;

#[async_trait]
pub trait OutputStore: Send + Sync {
    /// Persist a blob, returning an opaque reference stored in
    /// `jobevent.output_ref`.
    async fn put(&self, data: &[u8]) -> Result<String, StoreError>;

    /// Reassemble a blob previously stored via [`put`](Self::put).
    async fn get(&self, output_ref: &str) -> Result<Vec<u8>, StoreError>;
}

pub struct SqliteOutputStore {
    pool: SqlitePool,
}

impl SqliteOutputStore {
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(dsn).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rawoutput (id INTEGER PRIMARY KEY AUTOINCREMENT, data BLOB NOT NULL)",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl OutputStore for SqliteOutputStore {
    async fn put(&self, data: &[u8]) -> Result<String, StoreError> {
        let rec = sqlx::query("INSERT INTO rawoutput (data) VALUES (?)")
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(rec.last_insert_rowid().to_string())
    }

    async fn get(&self, output_ref: &str) -> Result<Vec<u8>, StoreError> {
        let id: i64 = output_ref.parse().map_err(|_| StoreError::NotFound)?;
        let row = sqlx::query("SELECT data FROM rawoutput WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.get::<Vec<u8>, _>("data"))
    }
}

pub struct PostgresOutputStore {
    pool: PgPool,
}

impl PostgresOutputStore {
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(dsn).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rawoutput (id BIGSERIAL PRIMARY KEY, data BYTEA NOT NULL)",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl OutputStore for PostgresOutputStore {
    async fn put(&self, data: &[u8]) -> Result<String, StoreError> {
        let row = sqlx::query("INSERT INTO rawoutput (data) VALUES ($1) RETURNING id")
            .bind(data)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("id").to_string())
    }

    async fn get(&self, output_ref: &str) -> Result<Vec<u8>, StoreError> {
        let id: i64 = output_ref.parse().map_err(|_| StoreError::NotFound)?;
        let row = sqlx::query("SELECT data FROM rawoutput WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.get::<Vec<u8>, _>("data"))
    }
}

/// Connect to an output store backend from a DSN, dispatching on scheme.
pub async fn connect(dsn: &str) -> Result<Box<dyn OutputStore>, StoreError> {
    if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
        Ok(Box::new(PostgresOutputStore::connect(dsn).await?))
    } else {
        Ok(Box::new(SqliteOutputStore::connect(dsn).await?))
    }
}
