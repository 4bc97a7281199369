//! Hybrid cache: memory → local persistent store → remote repository
//!
//! Reads fall through the tiers and back-fill the faster ones on a hit
//! ("fill on read"). Remote failures degrade to a miss; the engine never
//! retries on its own. Version checks and incremental sync live in
//! [`sync`].

pub mod local;
pub mod memory;
pub mod pattern;
pub mod remote;
pub mod sync;

pub use local::{LocalStats, LocalStore, RenderStatus, SqliteLocalStore};
pub use memory::MemoryTier;
pub use pattern::KeyPattern;
pub use remote::{ChangePage, ChangedPart, HttpRemoteRepository, RemoteError, RemoteRepository};
pub use sync::{SyncReport, VersionCheck};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::types::PartKey;

/// Version string used for entries cached before any sync completed
pub const UNVERSIONED: &str = "unversioned";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Corrupt cache data: {0}")]
    Corrupt(String),

    #[error("No remote repository configured")]
    RemoteUnavailable,

    #[error("Sync cancelled")]
    Cancelled,
}

/// Cache settings (`[cache]` section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_capacity: usize,
    /// Base URL of the remote asset repository; remote tier disabled if unset
    pub remote_url: Option<String>,
    pub remote_timeout_secs: u64,
    /// Changes requested per page during sync
    pub sync_batch_size: usize,
    /// Concurrent downloads within one page
    pub download_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 512,
            remote_url: None,
            remote_timeout_secs: 10,
            sync_batch_size: 100,
            download_concurrency: 4,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_capacity == 0 {
            return Err("cache.memory_capacity must be > 0".to_string());
        }
        if self.sync_batch_size == 0 {
            return Err("cache.sync_batch_size must be > 0".to_string());
        }
        if self.download_concurrency == 0 {
            return Err("cache.download_concurrency must be > 0".to_string());
        }
        if self.remote_timeout_secs == 0 {
            return Err("cache.remote_timeout_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// Payload kinds sharing the `(part, color)` key space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Vectors,
    Asset,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Vectors => "vectors",
            CacheKind::Asset => "asset",
        }
    }
}

/// Reference features of one part in one color
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartVectors {
    pub shape_vector: Vec<f32>,
    #[serde(default)]
    pub color_lab: Option<[f32; 3]>,
    #[serde(default)]
    pub size_stud: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CachePayload {
    Vectors(PartVectors),
    /// Rendered reference image bytes
    Asset(Vec<u8>),
}

impl CachePayload {
    pub fn kind(&self) -> CacheKind {
        match self {
            CachePayload::Vectors(_) => CacheKind::Vectors,
            CachePayload::Asset(_) => CacheKind::Asset,
        }
    }

    /// Bytes stored by the persistent tier
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        match self {
            CachePayload::Vectors(v) => Ok(serde_json::to_vec(v)?),
            CachePayload::Asset(bytes) => Ok(bytes.clone()),
        }
    }

    pub fn decode(kind: CacheKind, bytes: Vec<u8>) -> Result<Self, CacheError> {
        match kind {
            CacheKind::Vectors => Ok(CachePayload::Vectors(serde_json::from_slice(&bytes)?)),
            CacheKind::Asset => Ok(CachePayload::Asset(bytes)),
        }
    }
}

/// Tier an entry was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Memory,
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CacheKind,
    pub key: PartKey,
}

impl CacheKey {
    pub fn new(kind: CacheKind, key: PartKey) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: PartKey,
    pub version: String,
    pub payload: CachePayload,
    pub origin: CacheTier,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.payload.kind(), self.key.clone())
    }
}

/// Catalog-wide version marker, persisted last during sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub total_count: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Unknown,
    UpToDate,
    Stale,
    Syncing,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SyncState {
    pub status: SyncStatus,
    pub remote_version: Option<String>,
    pub last_error: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub local_version: Option<String>,
    pub remote_version: Option<String>,
    pub sync_status: SyncStatus,
    /// Bytes held by the persistent tier
    pub total_size: u64,
    pub local_entries: u64,
    pub memory_entries: usize,
    pub memory_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub memory_removed: usize,
    pub local_removed: u64,
}

/// Three-tier cache owned by one service instance
pub struct HybridCache {
    config: CacheConfig,
    memory: MemoryTier,
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteRepository>>,
    state: RwLock<SyncState>,
}

impl HybridCache {
    pub fn new(
        config: CacheConfig,
        local: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteRepository>>,
    ) -> Self {
        Self {
            memory: MemoryTier::new(config.memory_capacity),
            config,
            local,
            remote,
            state: RwLock::new(SyncState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    pub(crate) fn remote(&self) -> Result<&Arc<dyn RemoteRepository>, CacheError> {
        self.remote.as_ref().ok_or(CacheError::RemoteUnavailable)
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.state.read().await.status
    }

    async fn current_version(&self) -> String {
        match self.local.version().await {
            Ok(Some(record)) => record.version,
            Ok(None) => UNVERSIONED.to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to read local version record");
                UNVERSIONED.to_string()
            }
        }
    }

    /// Look up one payload, falling through memory → local → remote
    ///
    /// A remote hit is written back to both faster tiers. Local and remote
    /// failures are logged and treated as misses.
    pub async fn get(&self, kind: CacheKind, key: &PartKey) -> Result<Option<CacheEntry>, CacheError> {
        let cache_key = CacheKey::new(kind, key.clone());

        if let Some(mut entry) = self.memory.get(&cache_key).await {
            debug!(key = %cache_key, "Memory tier hit");
            entry.origin = CacheTier::Memory;
            return Ok(Some(entry));
        }

        match self.local.get(&cache_key).await {
            Ok(Some(entry)) => {
                debug!(key = %cache_key, "Local tier hit");
                self.memory.insert(entry.clone()).await;
                return Ok(Some(entry));
            }
            Ok(None) => {}
            Err(e) => warn!(key = %cache_key, error = %e, "Local tier read failed, trying remote"),
        }

        let Some(remote) = &self.remote else {
            return Ok(None);
        };

        let fetched = match kind {
            CacheKind::Vectors => remote.fetch_vectors(key).await.map(CachePayload::Vectors),
            CacheKind::Asset => remote.fetch_asset(key).await.map(CachePayload::Asset),
        };
        let payload = match fetched {
            Ok(payload) => payload,
            Err(RemoteError::NotFound(_)) => {
                debug!(key = %cache_key, "Not found in any tier");
                return Ok(None);
            }
            Err(e) => {
                warn!(key = %cache_key, error = %e, "Remote fetch failed, treating as miss");
                return Ok(None);
            }
        };

        let entry = CacheEntry {
            key: key.clone(),
            version: self.current_version().await,
            payload,
            origin: CacheTier::Remote,
            cached_at: Utc::now(),
        };
        if let Err(e) = self.local.put(&entry).await {
            warn!(key = %cache_key, error = %e, "Failed to back-fill local tier");
        }
        self.memory.insert(entry.clone()).await;
        debug!(key = %cache_key, "Remote hit, faster tiers back-filled");
        Ok(Some(entry))
    }

    pub async fn get_vectors(&self, key: &PartKey) -> Result<Option<PartVectors>, CacheError> {
        Ok(self
            .get(CacheKind::Vectors, key)
            .await?
            .and_then(|entry| match entry.payload {
                CachePayload::Vectors(v) => Some(v),
                CachePayload::Asset(_) => None,
            }))
    }

    /// Store a payload in the local and memory tiers
    pub async fn put(&self, key: PartKey, payload: CachePayload) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key,
            version: self.current_version().await,
            payload,
            origin: CacheTier::Local,
            cached_at: Utc::now(),
        };
        self.local.put(&entry).await?;
        self.memory.insert(entry).await;
        Ok(())
    }

    /// Drop entries matching an exact key or glob from every tier
    ///
    /// The remote purge is best-effort.
    pub async fn invalidate(&self, pattern: &str) -> Result<InvalidationReport, CacheError> {
        let pattern = KeyPattern::parse(pattern)?;
        let memory_removed = self.memory.remove_matching(&pattern).await;
        let local_removed = self.local.remove(&pattern).await?;

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.purge(pattern.prefix()).await {
                warn!(pattern = %pattern.as_str(), error = %e, "Remote purge failed");
            }
        }

        info!(
            pattern = %pattern.as_str(),
            memory_removed,
            local_removed,
            "Cache invalidated"
        );
        Ok(InvalidationReport {
            memory_removed,
            local_removed,
        })
    }

    /// Wipe memory and local tiers, including the version record
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.memory.clear().await;
        self.local.clear().await?;
        let mut state = self.state.write().await;
        state.status = SyncStatus::Unknown;
        state.last_error = None;
        info!("Cache cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let local_version = self.local.version().await?.map(|r| r.version);
        let local_stats = self.local.stats().await?;
        let state = self.state.read().await.clone();
        Ok(CacheStats {
            local_version,
            remote_version: state.remote_version,
            sync_status: state.status,
            total_size: local_stats.total_size,
            local_entries: local_stats.entries,
            memory_entries: self.memory.len().await,
            memory_capacity: self.memory.capacity(),
            last_sync: state.last_sync,
            last_error: state.last_error,
        })
    }

    pub(crate) async fn update_state(&self, f: impl FnOnce(&mut SyncState)) {
        let mut state = self.state.write().await;
        f(&mut state);
    }
}

impl fmt::Debug for HybridCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridCache")
            .field("config", &self.config)
            .field("memory", &self.memory)
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_encoding() {
        let vectors = CachePayload::Vectors(PartVectors {
            shape_vector: vec![1.0, -2.0, 0.5],
            color_lab: None,
            size_stud: Some(2.0),
        });
        let bytes = vectors.encode().unwrap();
        assert_eq!(CachePayload::decode(CacheKind::Vectors, bytes).unwrap(), vectors);

        let asset = CachePayload::Asset(vec![0x89, 0x50]);
        assert_eq!(asset.encode().unwrap(), vec![0x89, 0x50]);
    }

    #[test]
    fn test_corrupt_vectors_fail_to_decode() {
        let err = CachePayload::decode(CacheKind::Vectors, b"not json".to_vec()).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }

    #[test]
    fn test_cache_key_display() {
        let key = CacheKey::new(CacheKind::Asset, PartKey::new("3001", 4));
        assert_eq!(key.to_string(), "asset:3001_4");
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::default().validate().is_ok());
        let bad = CacheConfig {
            memory_capacity: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_entry_serializes_to_structured_value() {
        let entry = CacheEntry {
            key: PartKey::new("3001", 0),
            version: "v2".to_string(),
            payload: CachePayload::Asset(vec![1]),
            origin: CacheTier::Remote,
            cached_at: Utc::now(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["payload"]["kind"], "asset");
        assert_eq!(value["origin"], "remote");
    }
}
