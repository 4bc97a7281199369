//! Matching service facade
//!
//! Owns the catalog, the hybrid cache and the scoring components for one
//! deployment. Resolved catalog entries are memoized and dropped whenever the
//! cache's version record changes, or on invalidation and clear.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheStats, HybridCache, InvalidationReport, PartVectors, SyncReport};
use crate::catalog::{CatalogRepository, Detector};
use crate::confusion::ConfusionTable;
use crate::matcher::{MatchError, MatchingConfig, MatchingPass, PairScorer};
use crate::tiers::{KeywordTierClassifier, PartDescriptor, TierAssignment, TierClassifier};
use crate::types::{BomLine, CatalogEntry, CatalogRecord, Detection, MatchResult, PartKey, Tier};
use crate::voting::{AttributeDetectors, WeightProfile};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Catalog(#[from] partcheck_common::Error),

    #[error("No detector configured")]
    DetectorUnavailable,
}

/// Resolve a catalog record plus cached vectors into a scoring entry
///
/// A tier stored on the record wins over the classifier; the classifier's
/// printed-variant blend is kept only for GEOMETRY parts.
pub fn build_entry(
    record: CatalogRecord,
    vectors: Option<PartVectors>,
    classifier: &dyn TierClassifier,
) -> CatalogEntry {
    let classified = classifier.classify(&PartDescriptor::from(&record));
    let assignment = match record.tier {
        Some(tier) if tier != classified.tier => TierAssignment {
            blend: classified.blend.filter(|_| tier == Tier::Geometry),
            ..TierAssignment::for_tier(tier, 1.0)
        },
        _ => classified,
    };

    let flip_tolerance = match (assignment.tier, record.orientation_sensitive) {
        (Tier::Semantic, _) => 0.0,
        (_, Some(true)) => assignment.flip_tolerance.min(0.5),
        (_, Some(false)) => 1.0,
        (_, None) => assignment.flip_tolerance,
    };

    let (feature_vector, color_lab, size_studs) = match vectors {
        Some(v) => (Some(v.shape_vector), v.color_lab, v.size_stud),
        None => (None, None, None),
    };

    CatalogEntry {
        part_id: record.part_id,
        color_id: record.color_id,
        name: record.name,
        tier: assignment.tier,
        weight_profile: WeightProfile::for_tier(assignment.tier),
        blend: assignment.blend,
        expected_stud_count: record.expected_stud_count,
        expected_hole_count: record.expected_hole_count,
        center_stud: record.center_stud,
        groove: record.groove,
        orientation_sensitive: record
            .orientation_sensitive
            .unwrap_or(assignment.orientation_sensitive),
        flip_tolerance,
        confusable_with: record.confusable_with,
        feature_vector,
        color_lab,
        size_studs,
    }
}

#[derive(Debug, Default)]
struct EntryMemo {
    version: Option<String>,
    entries: HashMap<PartKey, Arc<CatalogEntry>>,
}

pub struct MatchingService {
    config: MatchingConfig,
    catalog: Arc<dyn CatalogRepository>,
    cache: Arc<HybridCache>,
    classifier: Arc<dyn TierClassifier>,
    attribute_detectors: Arc<AttributeDetectors>,
    confusion: ConfusionTable,
    detector: Option<Arc<dyn Detector>>,
    memo: RwLock<EntryMemo>,
}

impl MatchingService {
    pub fn new(
        config: MatchingConfig,
        catalog: Arc<dyn CatalogRepository>,
        cache: Arc<HybridCache>,
    ) -> Self {
        Self {
            config,
            catalog,
            cache,
            classifier: Arc::new(KeywordTierClassifier::new()),
            attribute_detectors: Arc::new(AttributeDetectors::with_defaults()),
            confusion: ConfusionTable::builtin(),
            detector: None,
            memo: RwLock::new(EntryMemo::default()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TierClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_attribute_detectors(mut self, detectors: AttributeDetectors) -> Self {
        self.attribute_detectors = Arc::new(detectors);
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<HybridCache> {
        &self.cache
    }

    /// Run one closed-world matching pass
    ///
    /// Missing catalog data never fails the pass; affected pairs score the
    /// configured default.
    pub async fn run_matching_pass(
        &self,
        detections: &[Detection],
        bom: &[BomLine],
        cancel: &CancellationToken,
    ) -> Result<MatchResult, ServiceError> {
        let mut keys: Vec<PartKey> = Vec::new();
        for line in bom.iter().filter(|l| l.quantity > 0) {
            let key = line.key();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let entries = self.resolve_entries(&keys).await;

        let mut confusion = self.confusion.clone();
        confusion.extend_from_entries(entries.values().map(Arc::as_ref));
        let scorer = PairScorer::new(self.config, self.attribute_detectors.clone(), confusion);

        debug!(
            detections = detections.len(),
            bom_lines = bom.len(),
            resolved = entries.len(),
            "Running matching pass"
        );
        let result = MatchingPass::run(self.config, bom, detections, &entries, &scorer, cancel)?;
        Ok(result)
    }

    /// Match detections against a stored set's BOM
    pub async fn match_set(
        &self,
        set_id: &str,
        detections: &[Detection],
        cancel: &CancellationToken,
    ) -> Result<MatchResult, ServiceError> {
        let bom = self.catalog.load_bom(set_id).await?;
        info!(set_id, lines = bom.len(), "Matching against set");
        self.run_matching_pass(detections, &bom, cancel).await
    }

    /// Detect objects in an image and match them against a set
    pub async fn recognize(
        &self,
        set_id: &str,
        image: &[u8],
        cancel: &CancellationToken,
    ) -> Result<MatchResult, ServiceError> {
        let detector = self.detector.as_ref().ok_or(ServiceError::DetectorUnavailable)?;
        let (detections, bom) =
            tokio::try_join!(detector.detect(image), self.catalog.load_bom(set_id))?;
        info!(
            set_id,
            detections = detections.len(),
            lines = bom.len(),
            "Recognition pass"
        );
        self.run_matching_pass(&detections, &bom, cancel).await
    }

    pub async fn get_cache_stats(&self) -> Result<CacheStats, ServiceError> {
        Ok(self.cache.stats().await?)
    }

    pub async fn invalidate(&self, pattern: &str) -> Result<InvalidationReport, ServiceError> {
        let report = self.cache.invalidate(pattern).await?;
        self.memo.write().await.entries.clear();
        Ok(report)
    }

    pub async fn clear_cache(&self) -> Result<(), ServiceError> {
        self.cache.clear().await?;
        *self.memo.write().await = EntryMemo::default();
        Ok(())
    }

    /// Check the remote version and sync if it changed
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport, ServiceError> {
        let report = self.cache.sync(cancel).await?;
        self.refresh_memo().await;
        Ok(report)
    }

    /// Drop memoized entries if the cache version moved
    async fn refresh_memo(&self) {
        let current = match self.cache.local().version().await {
            Ok(record) => record.map(|r| r.version),
            Err(e) => {
                warn!(error = %e, "Cannot read cache version, keeping memoized entries");
                return;
            }
        };

        let mut memo = self.memo.write().await;
        if memo.version != current {
            debug!(
                from = ?memo.version,
                to = ?current,
                dropped = memo.entries.len(),
                "Cache version changed, dropping memoized entries"
            );
            memo.entries.clear();
            memo.version = current;
        }
    }

    async fn resolve_entries(&self, keys: &[PartKey]) -> HashMap<PartKey, Arc<CatalogEntry>> {
        self.refresh_memo().await;

        let mut resolved = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();
        {
            let memo = self.memo.read().await;
            for key in keys {
                match memo.entries.get(key) {
                    Some(entry) => {
                        resolved.insert(key.clone(), entry.clone());
                    }
                    None => missing.push(key.clone()),
                }
            }
        }

        if missing.is_empty() {
            return resolved;
        }

        let loaded = join_all(missing.iter().map(|key| self.load_entry(key))).await;

        let mut memo = self.memo.write().await;
        for (key, entry) in missing.into_iter().zip(loaded) {
            let Some(entry) = entry else {
                continue;
            };
            let entry = Arc::new(entry);
            // Entries without vectors are retried on the next pass
            if entry.feature_vector.is_some() {
                memo.entries.insert(key.clone(), entry.clone());
            }
            resolved.insert(key, entry);
        }
        resolved
    }

    async fn load_entry(&self, key: &PartKey) -> Option<CatalogEntry> {
        let (record, vectors) = tokio::join!(
            self.catalog.load_catalog_entry(&key.part_id, key.color_id),
            self.cache.get_vectors(key)
        );

        let record = match record {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(part = %key, "BOM part missing from catalog");
                return None;
            }
            Err(e) => {
                warn!(part = %key, error = %e, "Catalog lookup failed");
                return None;
            }
        };

        let vectors = vectors.unwrap_or_else(|e| {
            warn!(part = %key, error = %e, "Vector lookup failed");
            None
        });
        if vectors.is_none() {
            debug!(part = %key, "No cached vectors, pair scores will use the default");
        }

        Some(build_entry(record, vectors, self.classifier.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(part_id: &str, name: &str) -> CatalogRecord {
        CatalogRecord {
            part_id: part_id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn vectors() -> PartVectors {
        PartVectors {
            shape_vector: vec![0.5, 0.5, 0.5],
            color_lab: Some([40.0, 0.0, 0.0]),
            size_stud: Some(8.0),
        }
    }

    #[test]
    fn test_build_entry_classifies_missing_tier() {
        let classifier = KeywordTierClassifier::new();
        let entry = build_entry(record("2780", "Technic Pin"), Some(vectors()), &classifier);
        assert_eq!(entry.tier, Tier::Structural);
        assert_eq!(entry.weight_profile, WeightProfile::STRUCTURAL);
        assert_eq!(entry.feature_vector.as_deref(), Some(&[0.5, 0.5, 0.5][..]));
        assert_eq!(entry.size_studs, Some(8.0));
    }

    #[test]
    fn test_stored_tier_wins() {
        let classifier = KeywordTierClassifier::new();
        let mut rec = record("2780", "Technic Pin");
        rec.tier = Some(Tier::Semantic);
        let entry = build_entry(rec, None, &classifier);
        assert_eq!(entry.tier, Tier::Semantic);
        assert_eq!(entry.flip_tolerance, 0.0);
        assert!(!entry.accepts_flip());
        assert!(entry.feature_vector.is_none());
    }

    #[test]
    fn test_explicit_orientation_flag() {
        let classifier = KeywordTierClassifier::new();
        let mut rec = record("3001", "Brick 2 x 4");
        rec.orientation_sensitive = Some(true);
        let entry = build_entry(rec, None, &classifier);
        assert!(entry.orientation_sensitive);
        assert_eq!(entry.flip_tolerance, 0.5);
    }

    #[test]
    fn test_printed_blend_kept_for_geometry() {
        let classifier = KeywordTierClassifier::new();
        let entry = build_entry(record("3068bpr0001", "Tile 2 x 2"), None, &classifier);
        assert_eq!(entry.tier, Tier::Geometry);
        assert!(entry.blend.is_some());
    }
}
