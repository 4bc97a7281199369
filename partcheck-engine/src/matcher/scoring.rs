//! Pair scoring: orientation comparison + attribute voting + confusion
//!
//! Non-SEMANTIC parts blend orientation similarity with the vote:
//! `raw = w × orientation + (1 − w) × vote`. SEMANTIC parts never accept a
//! mirrored match and use `raw = 0.7 × semantic_similarity + 0.3 × sculpted
//! confidence`, where the semantic similarity is the non-flipped cosine and
//! the sculpted confidence is the SEMANTIC-profile vote.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::MatchingConfig;
use crate::confusion::{Candidate, ConfusionTable};
use crate::orientation::{self, OrientationComparison};
use crate::types::{CatalogEntry, Detection, PartKey, Tier};
use crate::voting::{AttributeDetectors, VoteBreakdown, VotingScorer};

const SEMANTIC_SIMILARITY_WEIGHT: f32 = 0.7;
const SCULPTED_CONFIDENCE_WEIGHT: f32 = 0.3;

/// Raw score of one (detection, catalog entry) pair with its explanation
#[derive(Debug, Clone, Serialize)]
pub struct PairScore {
    pub raw_score: f32,
    pub orientation: Option<OrientationComparison>,
    pub vote: Option<VoteBreakdown>,
    /// Default score substituted for missing data
    pub low_confidence: bool,
}

/// Score of one detection against one `(part, color)` key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyScore {
    pub key: PartKey,
    pub raw_score: f32,
    pub penalty: f32,
    pub final_score: f32,
    pub core_matches: usize,
    pub low_confidence: bool,
    pub is_flipped: bool,
}

impl KeyScore {
    /// Key score with no penalty and no diagnostics
    pub fn uniform(key: PartKey, score: f32) -> Self {
        Self {
            key,
            raw_score: score,
            penalty: 0.0,
            final_score: score,
            core_matches: 0,
            low_confidence: false,
            is_flipped: false,
        }
    }
}

/// Stateless scorer shared across a pass
#[derive(Debug)]
pub struct PairScorer {
    config: MatchingConfig,
    voting: VotingScorer,
    detectors: Arc<AttributeDetectors>,
    confusion: ConfusionTable,
}

impl PairScorer {
    pub fn new(
        config: MatchingConfig,
        detectors: impl Into<Arc<AttributeDetectors>>,
        confusion: ConfusionTable,
    ) -> Self {
        Self {
            config,
            voting: VotingScorer::new(),
            detectors: detectors.into(),
            confusion,
        }
    }

    pub fn confusion(&self) -> &ConfusionTable {
        &self.confusion
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    fn default_score(&self) -> PairScore {
        PairScore {
            raw_score: self.config.missing_vector_score,
            orientation: None,
            vote: None,
            low_confidence: true,
        }
    }

    /// Raw score of one pair
    ///
    /// A missing catalog entry or a missing/malformed feature vector on either
    /// side yields the configured default score instead of an error.
    pub fn score_pair(&self, detection: &Detection, entry: Option<&CatalogEntry>) -> PairScore {
        let Some(entry) = entry else {
            return self.default_score();
        };

        let comparison = match (&detection.feature_vector, &entry.feature_vector) {
            (Some(det_vec), Some(cat_vec)) => orientation::compare(
                det_vec,
                cat_vec,
                entry.accepts_flip(),
                detection.flip_signals.as_ref(),
            ),
            _ => None,
        };
        let Some(comparison) = comparison else {
            debug!(
                detection = %detection.id,
                part = %entry.key(),
                "Feature vector missing or malformed, using default score"
            );
            return self.default_score();
        };

        let scores = self.detectors.evaluate(detection, entry);
        let vote = self
            .voting
            .vote_blended(&scores, &entry.weight_profile, entry.blend.as_ref());

        let raw = match entry.tier {
            Tier::Semantic => {
                SEMANTIC_SIMILARITY_WEIGHT * comparison.normal_similarity.max(0.0)
                    + SCULPTED_CONFIDENCE_WEIGHT * vote.final_score
            }
            Tier::Geometry | Tier::Structural => {
                let w = self.config.similarity_weight;
                w * comparison.confidence.max(0.0) + (1.0 - w) * vote.final_score
            }
        };

        PairScore {
            raw_score: raw.clamp(0.0, 1.0),
            orientation: Some(comparison),
            vote: Some(vote),
            low_confidence: false,
        }
    }

    /// Score one detection against every key, then apply confusion penalties
    ///
    /// Returns scores in `keys` order.
    pub fn score_detection(
        &self,
        detection: &Detection,
        keys: &[PartKey],
        entries: &HashMap<PartKey, Arc<CatalogEntry>>,
    ) -> Vec<KeyScore> {
        let pair_scores: Vec<PairScore> = keys
            .iter()
            .map(|key| {
                let entry = entries.get(key).map(Arc::as_ref);
                if entry.is_none() {
                    warn!(part = %key, "No catalog entry for BOM key, using default score");
                }
                self.score_pair(detection, entry)
            })
            .collect();

        let candidates: Vec<Candidate> = keys
            .iter()
            .zip(&pair_scores)
            .map(|(key, ps)| Candidate::for_key(key, ps.raw_score))
            .collect();
        let adjusted = self.confusion.apply(&candidates, self.config.candidate_floor);
        let adjusted: HashMap<(&str, i32), &Candidate> = adjusted
            .iter()
            .map(|c| ((c.part_id.as_str(), c.color_id), c))
            .collect();

        keys.iter()
            .zip(pair_scores)
            .map(|(key, ps)| {
                let (penalty, final_score) = adjusted
                    .get(&(key.part_id.as_str(), key.color_id))
                    .map(|c| (c.penalty, c.score))
                    .unwrap_or((0.0, ps.raw_score));
                KeyScore {
                    key: key.clone(),
                    raw_score: ps.raw_score,
                    penalty,
                    final_score,
                    core_matches: ps.vote.as_ref().map(|v| v.core_matches).unwrap_or(0),
                    low_confidence: ps.low_confidence,
                    is_flipped: ps
                        .orientation
                        .map(|o| o.is_flipped && !o.flip_rejected)
                        .unwrap_or(false),
                }
            })
            .collect()
    }
}
