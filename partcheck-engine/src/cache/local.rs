//! On-device persistent cache tier (SQLite)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;

use super::pattern::KeyPattern;
use super::{CacheEntry, CacheError, CacheKey, CacheKind, CachePayload, CacheTier, VersionRecord};
use crate::types::PartKey;

/// Render state of a part's asset, recorded during sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    Ready,
    NotRendered,
    Error,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::Ready => "ready",
            RenderStatus::NotRendered => "not_rendered",
            RenderStatus::Error => "error",
        }
    }
}

impl fmt::Display for RenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderStatus {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(RenderStatus::Ready),
            "not_rendered" => Ok(RenderStatus::NotRendered),
            "error" => Ok(RenderStatus::Error),
            other => Err(CacheError::Corrupt(format!("unknown render status '{}'", other))),
        }
    }
}

/// Size summary of the persistent tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocalStats {
    pub entries: u64,
    pub total_size: u64,
}

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Delete entries matching `pattern`; globs delete by literal prefix
    async fn remove(&self, pattern: &KeyPattern) -> Result<u64, CacheError>;

    /// Wipe all entries, render states and the version record
    async fn clear(&self) -> Result<(), CacheError>;

    async fn version(&self) -> Result<Option<VersionRecord>, CacheError>;

    async fn set_version(&self, record: &VersionRecord) -> Result<(), CacheError>;

    async fn set_render_status(
        &self,
        key: &PartKey,
        status: RenderStatus,
        detail: Option<&str>,
    ) -> Result<(), CacheError>;

    async fn render_status(&self, key: &PartKey) -> Result<Option<RenderStatus>, CacheError>;

    async fn stats(&self) -> Result<LocalStats, CacheError>;
}

/// Create the cache tables
pub async fn init_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            cache_key TEXT NOT NULL,
            kind TEXT NOT NULL,
            part_id TEXT NOT NULL,
            color_id INTEGER NOT NULL,
            version TEXT NOT NULL,
            payload BLOB NOT NULL,
            size_bytes INTEGER NOT NULL,
            cached_at TEXT NOT NULL,
            PRIMARY KEY (cache_key, kind)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version TEXT NOT NULL,
            hash TEXT NOT NULL,
            total_count INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS render_status (
            cache_key TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            detail TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` prefix match
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query(
            r#"
            SELECT part_id, color_id, version, payload, cached_at
            FROM cache_entries
            WHERE cache_key = ? AND kind = ?
            "#,
        )
        .bind(key.key.to_string())
        .bind(key.kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let bytes: Vec<u8> = row.try_get("payload")?;
        Ok(Some(CacheEntry {
            key: PartKey::new(row.try_get::<String, _>("part_id")?, row.try_get("color_id")?),
            version: row.try_get("version")?,
            payload: CachePayload::decode(key.kind, bytes)?,
            origin: CacheTier::Local,
            cached_at: row.try_get::<DateTime<Utc>, _>("cached_at")?,
        }))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let kind = entry.payload.kind();
        let bytes = entry.payload.encode()?;
        sqlx::query(
            r#"
            INSERT INTO cache_entries (cache_key, kind, part_id, color_id, version, payload, size_bytes, cached_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(cache_key, kind) DO UPDATE SET
                version = excluded.version,
                payload = excluded.payload,
                size_bytes = excluded.size_bytes,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(entry.key.to_string())
        .bind(kind.as_str())
        .bind(&entry.key.part_id)
        .bind(entry.key.color_id)
        .bind(&entry.version)
        .bind(&bytes)
        .bind(bytes.len() as i64)
        .bind(entry.cached_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, pattern: &KeyPattern) -> Result<u64, CacheError> {
        let result = if pattern.is_exact() {
            sqlx::query("DELETE FROM cache_entries WHERE cache_key = ?")
                .bind(pattern.as_str())
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query(r"DELETE FROM cache_entries WHERE cache_key LIKE ? ESCAPE '\'")
                .bind(like_prefix(pattern.prefix()))
                .execute(&self.pool)
                .await?
        };
        Ok(result.rows_affected())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cache_entries").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM render_status").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM cache_version").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn version(&self) -> Result<Option<VersionRecord>, CacheError> {
        let row = sqlx::query(
            "SELECT version, hash, total_count, updated_at FROM cache_version WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<VersionRecord, CacheError> {
            Ok(VersionRecord {
                version: row.try_get("version")?,
                hash: row.try_get("hash")?,
                total_count: row.try_get::<i64, _>("total_count")?.max(0) as u64,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn set_version(&self, record: &VersionRecord) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO cache_version (id, version, hash, total_count, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                hash = excluded.hash,
                total_count = excluded.total_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.version)
        .bind(&record.hash)
        .bind(record.total_count as i64)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_render_status(
        &self,
        key: &PartKey,
        status: RenderStatus,
        detail: Option<&str>,
    ) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO render_status (cache_key, status, detail, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                status = excluded.status,
                detail = excluded.detail,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.to_string())
        .bind(status.as_str())
        .bind(detail)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn render_status(&self, key: &PartKey) -> Result<Option<RenderStatus>, CacheError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM render_status WHERE cache_key = ?")
                .bind(key.to_string())
                .fetch_optional(&self.pool)
                .await?;
        status.map(|s| s.parse()).transpose()
    }

    async fn stats(&self) -> Result<LocalStats, CacheError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS entries, COALESCE(SUM(size_bytes), 0) AS total_size FROM cache_entries",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(LocalStats {
            entries: row.try_get::<i64, _>("entries")?.max(0) as u64,
            total_size: row.try_get::<i64, _>("total_size")?.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PartVectors;

    async fn store() -> SqliteLocalStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_tables(&pool).await.unwrap();
        SqliteLocalStore::new(pool)
    }

    fn vectors_entry(part: &str, color: i32) -> CacheEntry {
        CacheEntry {
            key: PartKey::new(part, color),
            version: "v1".to_string(),
            payload: CachePayload::Vectors(PartVectors {
                shape_vector: vec![0.1, 0.2, 0.3],
                color_lab: Some([50.0, 10.0, -5.0]),
                size_stud: Some(8.0),
            }),
            origin: CacheTier::Remote,
            cached_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_marks_local_origin() {
        let store = store().await;
        let entry = vectors_entry("3001", 0);
        store.put(&entry).await.unwrap();

        let loaded = store.get(&entry.cache_key()).await.unwrap().unwrap();
        assert_eq!(loaded.origin, CacheTier::Local);
        assert_eq!(loaded.payload, entry.payload);
        assert_eq!(loaded.key, entry.key);

        let other_kind = CacheKey::new(CacheKind::Asset, PartKey::new("3001", 0));
        assert!(store.get(&other_kind).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_exact_and_prefix() {
        let store = store().await;
        for (part, color) in [("3001", 0), ("3001", 4), ("30010", 1), ("3002", 0)] {
            store.put(&vectors_entry(part, color)).await.unwrap();
        }

        let exact = KeyPattern::parse("3001_0").unwrap();
        assert_eq!(store.remove(&exact).await.unwrap(), 1);

        // `_` in the prefix is literal, so 30010_1 survives
        let glob = KeyPattern::parse("3001_*").unwrap();
        assert_eq!(store.remove(&glob).await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap().entries, 2);
    }

    #[tokio::test]
    async fn test_version_record_and_clear() {
        let store = store().await;
        assert!(store.version().await.unwrap().is_none());

        let record = VersionRecord {
            version: "2024.1".to_string(),
            hash: "abc".to_string(),
            total_count: 12,
            updated_at: Utc::now(),
        };
        store.set_version(&record).await.unwrap();
        store.put(&vectors_entry("3001", 0)).await.unwrap();
        store
            .set_render_status(&PartKey::new("3001", 0), RenderStatus::NotRendered, None)
            .await
            .unwrap();

        let loaded = store.version().await.unwrap().unwrap();
        assert_eq!(loaded.version, "2024.1");
        assert_eq!(loaded.total_count, 12);

        store.clear().await.unwrap();
        assert!(store.version().await.unwrap().is_none());
        assert_eq!(store.stats().await.unwrap(), LocalStats::default());
        assert!(store
            .render_status(&PartKey::new("3001", 0))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_render_status_overwrite() {
        let store = store().await;
        let key = PartKey::new("973", 1);
        store
            .set_render_status(&key, RenderStatus::Error, Some("timeout"))
            .await
            .unwrap();
        store.set_render_status(&key, RenderStatus::Ready, None).await.unwrap();
        assert_eq!(store.render_status(&key).await.unwrap(), Some(RenderStatus::Ready));
    }
}
