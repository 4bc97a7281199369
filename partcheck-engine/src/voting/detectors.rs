//! Attribute detectors feeding the voting scorer
//!
//! Each detector turns one detection into a [0, 1] sub-score for a single
//! attribute, relative to the catalog entry it is compared against. The
//! default set reads the scalar observations reported by the upstream
//! detector; production vision routines can be plugged in per attribute, and
//! tests use [`FixedAttributeDetector`] for deterministic values.

use tracing::trace;

use super::{Attribute, AttributeScores};
use crate::similarity::{color_similarity, count_match, size_ratio_similarity};
use crate::types::{CatalogEntry, Detection};

/// Sub-score used when a detector abstains
pub const NEUTRAL_SCORE: f32 = 0.5;

/// Produces one attribute sub-score for a (detection, entry) pair
pub trait AttributeDetector: Send + Sync {
    fn attribute(&self) -> Attribute;

    /// `None` means "no evidence"; the neutral score is used instead
    fn score(&self, detection: &Detection, entry: &CatalogEntry) -> Option<f32>;
}

/// Deterministic detector returning a fixed value
#[derive(Debug, Clone, Copy)]
pub struct FixedAttributeDetector {
    pub attribute: Attribute,
    pub value: f32,
}

impl FixedAttributeDetector {
    pub fn new(attribute: Attribute, value: f32) -> Self {
        Self { attribute, value }
    }
}

impl AttributeDetector for FixedAttributeDetector {
    fn attribute(&self) -> Attribute {
        self.attribute
    }

    fn score(&self, _detection: &Detection, _entry: &CatalogEntry) -> Option<f32> {
        Some(self.value)
    }
}

/// Presence cue compared against whether the entry should have the feature
fn presence_match(observed: Option<f32>, expected: bool) -> Option<f32> {
    let p = observed?.clamp(0.0, 1.0);
    Some(if expected { p } else { 1.0 - p })
}

fn expects_round(entry: &CatalogEntry) -> bool {
    let name = entry.name.to_ascii_lowercase();
    ["round", "dish", "cylinder", "cone", "disk", "wheel"]
        .iter()
        .any(|kw| name.contains(kw))
}

/// Observation-backed detector used in the default registry
#[derive(Debug, Clone, Copy)]
struct ObservedAttribute(Attribute);

impl AttributeDetector for ObservedAttribute {
    fn attribute(&self) -> Attribute {
        self.0
    }

    fn score(&self, detection: &Detection, entry: &CatalogEntry) -> Option<f32> {
        let obs = &detection.observations;
        match self.0 {
            Attribute::RoundShape => presence_match(obs.round_shape, expects_round(entry)),
            Attribute::CenterStud => presence_match(obs.center_stud, entry.center_stud),
            Attribute::GroovePresence => presence_match(obs.groove, entry.groove),
            Attribute::StudCount => match obs.stud_count {
                Some(count) => Some(count_match(count, entry.expected_stud_count)),
                // Footprint size is a reasonable proxy for the stud layout
                None => match (detection.size_studs, entry.size_studs) {
                    (Some(a), Some(b)) => Some(size_ratio_similarity(a, b)),
                    _ => None,
                },
            },
            Attribute::TubePattern => obs.tube_pattern,
            Attribute::HoleCount => obs
                .hole_count
                .map(|count| count_match(count, entry.expected_hole_count)),
            Attribute::Symmetry => obs.symmetry,
            Attribute::EdgeQuality => obs.edge_quality,
            Attribute::TextureComplexity => obs.texture_complexity,
            Attribute::ColorConsistency => match (&detection.color_lab, &entry.color_lab) {
                (Some(a), Some(b)) => Some(color_similarity(a, b)),
                _ => None,
            },
            Attribute::PatternRecognition => obs.pattern,
        }
    }
}

/// Registry holding exactly one detector per attribute
pub struct AttributeDetectors {
    detectors: Vec<Box<dyn AttributeDetector>>,
}

impl AttributeDetectors {
    /// Observation-backed detectors for all eleven attributes
    pub fn with_defaults() -> Self {
        Self {
            detectors: Attribute::ALL
                .into_iter()
                .map(|a| Box::new(ObservedAttribute(a)) as Box<dyn AttributeDetector>)
                .collect(),
        }
    }

    /// Replace the detector for `detector.attribute()`
    pub fn with_detector(mut self, detector: impl AttributeDetector + 'static) -> Self {
        let attribute = detector.attribute();
        self.detectors.retain(|d| d.attribute() != attribute);
        self.detectors.push(Box::new(detector));
        self
    }

    /// Evaluate every attribute for one pair
    pub fn evaluate(&self, detection: &Detection, entry: &CatalogEntry) -> AttributeScores {
        let mut scores = AttributeScores::uniform(NEUTRAL_SCORE);
        for detector in &self.detectors {
            match detector.score(detection, entry) {
                Some(value) => scores.set(detector.attribute(), value),
                None => trace!(
                    detection = %detection.id,
                    attribute = %detector.attribute(),
                    "Attribute detector abstained"
                ),
            }
        }
        scores
    }
}

impl Default for AttributeDetectors {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for AttributeDetectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeDetectors")
            .field(
                "attributes",
                &self.detectors.iter().map(|d| d.attribute()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
