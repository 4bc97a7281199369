//! Catalog/BOM repository and detector contracts
//!
//! The catalog stores part metadata and kit bills of materials. Feature
//! vectors are not part of the catalog; they come from the hybrid cache.

use async_trait::async_trait;
use partcheck_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tracing::debug;

use crate::types::{BomLine, CatalogRecord, Detection, Tier};

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// BOM lines of a kit; `Error::NotFound` for unknown sets
    async fn load_bom(&self, set_id: &str) -> Result<Vec<BomLine>>;

    /// Catalog metadata for one part in one color, `None` when unknown
    async fn load_catalog_entry(&self, part_id: &str, color_id: i32) -> Result<Option<CatalogRecord>>;
}

/// Upstream object detector
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>>;
}

/// Create the catalog tables
pub async fn init_tables(pool: &SqlitePool) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_parts (
            part_id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            tier TEXT,
            expected_stud_count INTEGER NOT NULL DEFAULT 0,
            expected_hole_count INTEGER NOT NULL DEFAULT 0,
            center_stud INTEGER NOT NULL DEFAULT 0,
            groove INTEGER NOT NULL DEFAULT 0,
            orientation_sensitive INTEGER,
            confusable_with TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bom_lines (
            set_id TEXT NOT NULL,
            line_no INTEGER NOT NULL,
            part_id TEXT NOT NULL,
            color_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity >= 0),
            PRIMARY KEY (set_id, line_no)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// SQLite-backed catalog
///
/// Part metadata is color independent; the requested color is echoed back
/// on the returned record.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a part's metadata
    pub async fn upsert_part(&self, record: &CatalogRecord) -> Result<()> {
        let confusable = serde_json::to_string(&record.confusable_with)
            .map_err(|e| Error::Internal(format!("Failed to serialize confusables: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO catalog_parts (
                part_id, name, tier, expected_stud_count, expected_hole_count,
                center_stud, groove, orientation_sensitive, confusable_with
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(part_id) DO UPDATE SET
                name = excluded.name,
                tier = excluded.tier,
                expected_stud_count = excluded.expected_stud_count,
                expected_hole_count = excluded.expected_hole_count,
                center_stud = excluded.center_stud,
                groove = excluded.groove,
                orientation_sensitive = excluded.orientation_sensitive,
                confusable_with = excluded.confusable_with
            "#,
        )
        .bind(&record.part_id)
        .bind(&record.name)
        .bind(record.tier.map(|t| t.as_str()))
        .bind(record.expected_stud_count as i64)
        .bind(record.expected_hole_count as i64)
        .bind(record.center_stud)
        .bind(record.groove)
        .bind(record.orientation_sensitive)
        .bind(&confusable)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the BOM of a set
    pub async fn replace_bom(&self, set_id: &str, lines: &[BomLine]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM bom_lines WHERE set_id = ?")
            .bind(set_id)
            .execute(&mut *tx)
            .await?;
        for (line_no, line) in lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO bom_lines (set_id, line_no, part_id, color_id, quantity) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(set_id)
            .bind(line_no as i64)
            .bind(&line.part_id)
            .bind(line.color_id)
            .bind(line.quantity as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(set_id, lines = lines.len(), "BOM stored");
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for SqliteCatalog {
    async fn load_bom(&self, set_id: &str) -> Result<Vec<BomLine>> {
        let rows = sqlx::query(
            "SELECT part_id, color_id, quantity FROM bom_lines WHERE set_id = ? ORDER BY line_no",
        )
        .bind(set_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(Error::NotFound(format!("set {}", set_id)));
        }

        rows.iter()
            .map(|row| -> Result<BomLine> {
                Ok(BomLine {
                    part_id: row.try_get("part_id")?,
                    color_id: row.try_get("color_id")?,
                    quantity: row.try_get::<i64, _>("quantity")?.max(0) as u32,
                })
            })
            .collect()
    }

    async fn load_catalog_entry(&self, part_id: &str, color_id: i32) -> Result<Option<CatalogRecord>> {
        let row = sqlx::query(
            r#"
            SELECT name, tier, expected_stud_count, expected_hole_count,
                   center_stud, groove, orientation_sensitive, confusable_with
            FROM catalog_parts
            WHERE part_id = ?
            "#,
        )
        .bind(part_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tier = row
            .try_get::<Option<String>, _>("tier")?
            .map(|t| t.parse::<Tier>().map_err(Error::Internal))
            .transpose()?;
        let confusable_with: BTreeSet<String> =
            serde_json::from_str(&row.try_get::<String, _>("confusable_with")?)
                .map_err(|e| Error::Internal(format!("Corrupt confusables for {}: {}", part_id, e)))?;

        Ok(Some(CatalogRecord {
            part_id: part_id.to_string(),
            color_id,
            name: row.try_get("name")?,
            tier,
            expected_stud_count: row.try_get::<i64, _>("expected_stud_count")?.max(0) as u32,
            expected_hole_count: row.try_get::<i64, _>("expected_hole_count")?.max(0) as u32,
            center_stud: row.try_get("center_stud")?,
            groove: row.try_get("groove")?,
            orientation_sensitive: row.try_get("orientation_sensitive")?,
            confusable_with,
        }))
    }
}
