//! Database bootstrap for partcheck-engine

use partcheck_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (or create) the engine database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create catalog and cache tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    crate::catalog::init_tables(pool).await?;
    crate::cache::local::init_tables(pool).await?;

    tracing::info!("Database tables initialized (catalog_parts, bom_lines, cache_entries, cache_version, render_status)");
    Ok(())
}
