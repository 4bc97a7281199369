//! Closed-world slot matcher
//!
//! One [`MatchingPass`] per recognition pass, driven through
//! `INIT → SLOTS_EXPANDED → SCORED → ASSIGNED → PARTITIONED`:
//!
//! 1. Expand BOM lines into one slot per expected unit. Only these
//!    (part, color) combinations are shortage candidates.
//! 2. Score every (detection, slot) pair (orientation + voting + confusion).
//! 3. Greedily assign the highest-scoring unconsumed pairs above the accept
//!    threshold. This approximates maximum-weight bipartite matching; it is
//!    not an exact assignment solver.
//! 4. Unassigned slots go to `hold` when their best remaining candidate lies
//!    strictly between the low and accept thresholds, otherwise `missing`.

pub mod assignment;
pub mod scoring;
pub mod slots;

pub use scoring::{KeyScore, PairScore, PairScorer};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::{BomLine, BomSlot, CatalogEntry, Detection, DetectionRef, MatchResult, PartKey, ScoreEntry};

/// Matching thresholds and blend weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum final score for automatic acceptance
    pub accept_threshold: f32,
    /// Lower bound (exclusive) of the hold band
    pub low_threshold: f32,
    /// Score substituted when feature vectors are missing or malformed
    pub missing_vector_score: f32,
    /// Weight of orientation similarity vs. voting score (non-SEMANTIC)
    pub similarity_weight: f32,
    /// Candidates below this raw score never trigger confusion penalties
    pub candidate_floor: f32,
    /// Upper bound on expanded BOM slots per pass
    pub max_slots: usize,
    /// Upper bound on detections per pass
    pub max_detections: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.6,
            low_threshold: 0.3,
            missing_vector_score: 0.3,
            similarity_weight: 0.6,
            candidate_floor: 0.3,
            max_slots: 10_000,
            max_detections: 2_000,
        }
    }
}

impl MatchingConfig {
    /// Check threshold ordering and ranges
    pub fn validate(&self) -> Result<(), String> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !in_unit(self.accept_threshold) || !in_unit(self.low_threshold) {
            return Err("thresholds must lie in [0, 1]".to_string());
        }
        if self.low_threshold >= self.accept_threshold {
            return Err(format!(
                "low_threshold ({}) must be below accept_threshold ({})",
                self.low_threshold, self.accept_threshold
            ));
        }
        if !in_unit(self.missing_vector_score)
            || !in_unit(self.similarity_weight)
            || !in_unit(self.candidate_floor)
        {
            return Err("missing_vector_score, similarity_weight and candidate_floor must lie in [0, 1]".to_string());
        }
        if self.max_slots == 0 || self.max_detections == 0 {
            return Err("max_slots and max_detections must be > 0".to_string());
        }
        Ok(())
    }
}

/// Matching pass phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassPhase {
    Init,
    SlotsExpanded,
    Scored,
    Assigned,
    Partitioned,
}

impl fmt::Display for PassPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassPhase::Init => "INIT",
            PassPhase::SlotsExpanded => "SLOTS_EXPANDED",
            PassPhase::Scored => "SCORED",
            PassPhase::Assigned => "ASSIGNED",
            PassPhase::Partitioned => "PARTITIONED",
        };
        f.write_str(s)
    }
}

/// Matching errors
///
/// Data-quality problems never surface here; they are absorbed as default
/// scores. Only bugs (broken invariants), cancellation and oversized input
/// abort a pass.
#[derive(Debug, Error)]
pub enum MatchError {
    /// A partition or slot invariant was violated
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Pass driven out of order
    #[error("Invalid pass transition from {from} to {to}")]
    InvalidTransition { from: PassPhase, to: PassPhase },

    /// Cancellation token fired between detection batches
    #[error("Matching pass cancelled")]
    Cancelled,

    /// BOM or detection list exceeds the configured pass limits
    #[error("Pass input too large: {0}")]
    InputTooLarge(String),
}

/// Single-use matching pass
#[derive(Debug)]
pub struct MatchingPass {
    config: MatchingConfig,
    phase: PassPhase,
    slots: Vec<BomSlot>,
    detections: Vec<DetectionRef>,
    scores: Vec<ScoreEntry>,
    /// Indices into `scores` of accepted pairs
    assigned: Vec<usize>,
}

impl MatchingPass {
    pub fn new(config: MatchingConfig) -> Self {
        Self {
            config,
            phase: PassPhase::Init,
            slots: Vec::new(),
            detections: Vec::new(),
            scores: Vec::new(),
            assigned: Vec::new(),
        }
    }

    pub fn phase(&self) -> PassPhase {
        self.phase
    }

    pub fn slots(&self) -> &[BomSlot] {
        &self.slots
    }

    pub fn scores(&self) -> &[ScoreEntry] {
        &self.scores
    }

    fn transition(&mut self, expected: PassPhase, to: PassPhase) -> Result<(), MatchError> {
        if self.phase != expected {
            return Err(MatchError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        debug!(from = %self.phase, to = %to, "Matching pass transition");
        self.phase = to;
        Ok(())
    }

    /// INIT → SLOTS_EXPANDED
    pub fn expand_slots(&mut self, bom: &[BomLine]) -> Result<(), MatchError> {
        if self.phase != PassPhase::Init {
            return Err(MatchError::InvalidTransition {
                from: self.phase,
                to: PassPhase::SlotsExpanded,
            });
        }
        self.slots = slots::expand_slots(bom, self.config.max_slots)?;
        self.transition(PassPhase::Init, PassPhase::SlotsExpanded)
    }

    /// SLOTS_EXPANDED → SCORED, computing scores with `scorer`
    ///
    /// The cancellation token is checked before each detection.
    pub fn score(
        &mut self,
        detections: &[Detection],
        entries: &HashMap<PartKey, Arc<CatalogEntry>>,
        scorer: &PairScorer,
        cancel: &CancellationToken,
    ) -> Result<(), MatchError> {
        if self.phase != PassPhase::SlotsExpanded {
            return Err(MatchError::InvalidTransition {
                from: self.phase,
                to: PassPhase::Scored,
            });
        }
        self.check_detection_count(detections.len())?;

        let keys = slots::distinct_keys(&self.slots);
        let mut per_detection = Vec::with_capacity(detections.len());
        for detection in detections {
            if cancel.is_cancelled() {
                info!(
                    scored = per_detection.len(),
                    total = detections.len(),
                    "Matching pass cancelled during scoring"
                );
                return Err(MatchError::Cancelled);
            }
            per_detection.push(scorer.score_detection(detection, &keys, entries));
        }

        let refs = detections
            .iter()
            .enumerate()
            .map(|(index, d)| DetectionRef {
                index,
                id: d.id.clone(),
            })
            .collect();
        self.apply_scores(refs, per_detection)
    }

    fn check_detection_count(&self, count: usize) -> Result<(), MatchError> {
        if count > self.config.max_detections {
            return Err(MatchError::InputTooLarge(format!(
                "{} detections exceed the limit of {}",
                count, self.config.max_detections
            )));
        }
        Ok(())
    }

    /// SLOTS_EXPANDED → SCORED from precomputed per-detection key scores
    ///
    /// Every slot of a `(part, color)` shares that key's score. Keys without
    /// a score for a detection produce no pair.
    pub fn apply_scores(
        &mut self,
        detections: Vec<DetectionRef>,
        per_detection: Vec<Vec<KeyScore>>,
    ) -> Result<(), MatchError> {
        if per_detection.len() != detections.len() {
            return Err(MatchError::Invariant(format!(
                "{} score rows for {} detections",
                per_detection.len(),
                detections.len()
            )));
        }
        self.check_detection_count(detections.len())?;
        self.transition(PassPhase::SlotsExpanded, PassPhase::Scored)?;

        let mut scores = Vec::with_capacity(detections.len() * self.slots.len());
        for (detection_index, row) in per_detection.iter().enumerate() {
            let by_key: HashMap<&PartKey, &KeyScore> = row.iter().map(|k| (&k.key, k)).collect();
            for (slot_ref, slot) in self.slots.iter().enumerate() {
                let Some(ks) = by_key.get(&slot.key()) else {
                    continue;
                };
                scores.push(ScoreEntry {
                    detection_index,
                    slot_ref,
                    raw_score: ks.raw_score,
                    penalty: ks.penalty,
                    final_score: ks.final_score,
                    core_matches_count: ks.core_matches,
                    low_confidence: ks.low_confidence,
                    is_flipped: ks.is_flipped,
                });
            }
        }

        debug!(
            detections = detections.len(),
            slots = self.slots.len(),
            pairs = scores.len(),
            "Score matrix built"
        );
        self.detections = detections;
        self.scores = scores;
        Ok(())
    }

    /// SCORED → ASSIGNED
    pub fn assign(&mut self) -> Result<(), MatchError> {
        self.transition(PassPhase::Scored, PassPhase::Assigned)?;
        self.assigned = assignment::greedy_assign(
            &self.scores,
            self.detections.len(),
            self.slots.len(),
            self.config.accept_threshold,
        );
        Ok(())
    }

    /// ASSIGNED → PARTITIONED (terminal)
    pub fn partition(mut self) -> Result<MatchResult, MatchError> {
        self.transition(PassPhase::Assigned, PassPhase::Partitioned)?;

        let result = assignment::partition(
            std::mem::take(&mut self.slots),
            &self.detections,
            &self.scores,
            &self.assigned,
            &self.config,
        );
        assignment::verify_partition(&result, self.detections.len())?;

        info!(
            matched = result.matches.len(),
            missing = result.missing.len(),
            hold = result.hold.len(),
            unmatched_detections = result.unmatched_detections.len(),
            "Matching pass partitioned"
        );
        Ok(result)
    }

    /// Drive a full pass end to end
    pub fn run(
        config: MatchingConfig,
        bom: &[BomLine],
        detections: &[Detection],
        entries: &HashMap<PartKey, Arc<CatalogEntry>>,
        scorer: &PairScorer,
        cancel: &CancellationToken,
    ) -> Result<MatchResult, MatchError> {
        let mut pass = Self::new(config);
        pass.expand_slots(bom)?;
        pass.score(detections, entries, scorer, cancel)?;
        pass.assign()?;
        pass.partition()
    }
}
