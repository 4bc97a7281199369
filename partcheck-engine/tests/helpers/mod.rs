//! Test helper utilities
//!
//! Shared fixtures for partcheck-engine integration tests: an in-process
//! remote repository, a temporary database and service builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tempfile::TempDir;

use partcheck_engine::cache::{
    CacheConfig, ChangePage, ChangedPart, HybridCache, PartVectors, RemoteError, RemoteRepository,
    SqliteLocalStore, VersionRecord,
};
use partcheck_engine::catalog::{Detector, SqliteCatalog};
use partcheck_engine::matcher::MatchingConfig;
use partcheck_engine::types::{CatalogRecord, Detection, PartKey, Tier};
use partcheck_engine::{AppState, MatchingService};

/// Create a temporary database with all engine tables
///
/// The TempDir must be kept alive for the duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("partcheck_test.db");
    let pool = partcheck_engine::db::init_database_pool(&path).await.unwrap();
    (temp_dir, pool)
}

pub fn vectors(shape: &[f32]) -> PartVectors {
    PartVectors {
        shape_vector: shape.to_vec(),
        color_lab: None,
        size_stud: None,
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// In-process remote repository with call counters
#[derive(Default)]
pub struct FakeRemote {
    version: Mutex<String>,
    vectors: Mutex<HashMap<PartKey, PartVectors>>,
    assets: Mutex<HashMap<PartKey, Vec<u8>>>,
    changes: Mutex<Vec<ChangedPart>>,
    purged: Mutex<Vec<String>>,
    failing: AtomicBool,
    /// Change-feed requests at or past this offset time out
    pages_fail_from: Mutex<Option<u64>>,
    pub vector_fetches: AtomicUsize,
    pub asset_fetches: AtomicUsize,
    pub change_requests: AtomicUsize,
}

impl FakeRemote {
    pub fn new(version: &str) -> Self {
        let remote = Self::default();
        *remote.version.lock().unwrap() = version.to_string();
        remote
    }

    pub fn set_version(&self, version: &str) {
        *self.version.lock().unwrap() = version.to_string();
    }

    /// Add vectors without publishing a change
    pub fn insert_vectors(&self, key: PartKey, shape: &[f32]) {
        self.vectors.lock().unwrap().insert(key, vectors(shape));
    }

    /// Publish a part at `version`; `asset` of `None` means not rendered
    pub fn publish(&self, key: PartKey, version: &str, shape: &[f32], asset: Option<&[u8]>) {
        self.vectors.lock().unwrap().insert(key.clone(), vectors(shape));
        if let Some(bytes) = asset {
            self.assets.lock().unwrap().insert(key.clone(), bytes.to_vec());
        }
        self.changes.lock().unwrap().push(ChangedPart {
            part_id: key.part_id.clone(),
            color_id: key.color_id,
            version: version.to_string(),
            has_asset: asset.is_some(),
            sha256: asset.map(sha256_hex),
        });
    }

    /// Publish a part whose advertised digest does not match its bytes
    pub fn publish_corrupt(&self, key: PartKey, version: &str, shape: &[f32], asset: &[u8]) {
        self.vectors.lock().unwrap().insert(key.clone(), vectors(shape));
        self.assets.lock().unwrap().insert(key.clone(), asset.to_vec());
        self.changes.lock().unwrap().push(ChangedPart {
            part_id: key.part_id.clone(),
            color_id: key.color_id,
            version: version.to_string(),
            has_asset: true,
            sha256: Some(sha256_hex(b"something else")),
        });
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_pages_from(&self, offset: u64) {
        *self.pages_fail_from.lock().unwrap() = Some(offset);
    }

    pub fn purged(&self) -> Vec<String> {
        self.purged.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> usize {
        self.vector_fetches.load(Ordering::SeqCst) + self.asset_fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteRepository for FakeRemote {
    async fn fetch_asset(&self, key: &PartKey) -> Result<Vec<u8>, RemoteError> {
        self.check_available()?;
        self.asset_fetches.fetch_add(1, Ordering::SeqCst);
        self.assets
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(key.to_string()))
    }

    async fn fetch_vectors(&self, key: &PartKey) -> Result<PartVectors, RemoteError> {
        self.check_available()?;
        self.vector_fetches.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(key.to_string()))
    }

    async fn version(&self) -> Result<VersionRecord, RemoteError> {
        self.check_available()?;
        let changes = self.changes.lock().unwrap();
        Ok(VersionRecord {
            version: self.version.lock().unwrap().clone(),
            hash: String::new(),
            total_count: changes.len() as u64,
            updated_at: Utc::now(),
        })
    }

    async fn changes(
        &self,
        since: Option<&str>,
        offset: u64,
        limit: usize,
    ) -> Result<ChangePage, RemoteError> {
        self.check_available()?;
        self.change_requests.fetch_add(1, Ordering::SeqCst);
        if matches!(*self.pages_fail_from.lock().unwrap(), Some(from) if offset >= from) {
            return Err(RemoteError::Timeout(format!("changes at offset {}", offset)));
        }

        let matching: Vec<ChangedPart> = self
            .changes
            .lock()
            .unwrap()
            .iter()
            .filter(|c| since.map_or(true, |s| c.version.as_str() > s))
            .cloned()
            .collect();

        let start = (offset as usize).min(matching.len());
        let end = (start + limit).min(matching.len());
        let next_offset = (end < matching.len()).then_some(end as u64);
        Ok(ChangePage {
            changes: matching[start..end].to_vec(),
            next_offset,
        })
    }

    async fn purge(&self, prefix: &str) -> Result<(), RemoteError> {
        self.check_available()?;
        self.purged.lock().unwrap().push(prefix.to_string());
        Ok(())
    }
}

/// Detector that returns a fixed list regardless of the image
pub struct StaticDetector(pub Vec<Detection>);

#[async_trait]
impl Detector for StaticDetector {
    async fn detect(&self, _image: &[u8]) -> partcheck_common::Result<Vec<Detection>> {
        Ok(self.0.clone())
    }
}

pub fn detection(id: &str, shape: &[f32]) -> Detection {
    Detection {
        id: id.to_string(),
        confidence: 0.9,
        feature_vector: Some(shape.to_vec()),
        ..Default::default()
    }
}

pub fn brick(part_id: &str, color_id: i32) -> CatalogRecord {
    CatalogRecord {
        part_id: part_id.to_string(),
        color_id,
        name: "Brick 2 x 4".to_string(),
        tier: Some(Tier::Geometry),
        expected_stud_count: 8,
        ..Default::default()
    }
}

pub fn hybrid_cache(
    pool: &SqlitePool,
    config: CacheConfig,
    remote: Option<Arc<FakeRemote>>,
) -> HybridCache {
    let remote = remote.map(|r| r as Arc<dyn RemoteRepository>);
    HybridCache::new(config, Arc::new(SqliteLocalStore::new(pool.clone())), remote)
}

/// Engine fixture: database, catalog and service sharing one pool
pub struct TestEngine {
    pub _dir: TempDir,
    pub pool: SqlitePool,
    pub catalog: SqliteCatalog,
    pub remote: Option<Arc<FakeRemote>>,
    pub service: Arc<MatchingService>,
}

impl TestEngine {
    pub async fn new(remote: Option<Arc<FakeRemote>>) -> Self {
        Self::build(remote, None).await
    }

    pub async fn with_detector(remote: Option<Arc<FakeRemote>>, detections: Vec<Detection>) -> Self {
        Self::build(remote, Some(detections)).await
    }

    async fn build(remote: Option<Arc<FakeRemote>>, detections: Option<Vec<Detection>>) -> Self {
        let (dir, pool) = create_test_db().await;
        let cache = Arc::new(hybrid_cache(&pool, CacheConfig::default(), remote.clone()));
        let mut service = MatchingService::new(
            MatchingConfig::default(),
            Arc::new(SqliteCatalog::new(pool.clone())),
            cache,
        );
        if let Some(detections) = detections {
            service = service.with_detector(Arc::new(StaticDetector(detections)));
        }
        Self {
            _dir: dir,
            catalog: SqliteCatalog::new(pool.clone()),
            pool,
            remote,
            service: Arc::new(service),
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.service.clone())
    }
}
