//! Multi-attribute voting scorer
//!
//! Combines eleven independent [0, 1] attribute sub-scores with a tier
//! specific weight profile. When at least two of the tier's core attributes
//! individually exceed 0.5 a fixed bonus is added. The result is clamped to
//! [0, 1] and keeps the per-attribute breakdown for explainability.

pub mod detectors;

pub use detectors::{AttributeDetector, AttributeDetectors, FixedAttributeDetector};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tiers::TierBlend;
use crate::types::Tier;

/// Number of voting attributes
pub const ATTRIBUTE_COUNT: usize = 11;

/// Voting attributes, in profile weight order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    RoundShape,
    CenterStud,
    GroovePresence,
    StudCount,
    TubePattern,
    HoleCount,
    Symmetry,
    EdgeQuality,
    TextureComplexity,
    ColorConsistency,
    PatternRecognition,
}

impl Attribute {
    pub const ALL: [Attribute; ATTRIBUTE_COUNT] = [
        Attribute::RoundShape,
        Attribute::CenterStud,
        Attribute::GroovePresence,
        Attribute::StudCount,
        Attribute::TubePattern,
        Attribute::HoleCount,
        Attribute::Symmetry,
        Attribute::EdgeQuality,
        Attribute::TextureComplexity,
        Attribute::ColorConsistency,
        Attribute::PatternRecognition,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::RoundShape => "round_shape",
            Attribute::CenterStud => "center_stud",
            Attribute::GroovePresence => "groove_presence",
            Attribute::StudCount => "stud_count",
            Attribute::TubePattern => "tube_pattern",
            Attribute::HoleCount => "hole_count",
            Attribute::Symmetry => "symmetry",
            Attribute::EdgeQuality => "edge_quality",
            Attribute::TextureComplexity => "texture_complexity",
            Attribute::ColorConsistency => "color_consistency",
            Attribute::PatternRecognition => "pattern_recognition",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-attribute sub-scores for one (detection, catalog entry) pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeScores {
    values: [f32; ATTRIBUTE_COUNT],
}

impl AttributeScores {
    /// All attributes at the same value
    pub fn uniform(value: f32) -> Self {
        Self {
            values: [value.clamp(0.0, 1.0); ATTRIBUTE_COUNT],
        }
    }

    pub fn get(&self, attribute: Attribute) -> f32 {
        self.values[attribute.index()]
    }

    /// Set one sub-score, clamped to [0, 1]
    pub fn set(&mut self, attribute: Attribute, value: f32) {
        self.values[attribute.index()] = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn with(mut self, attribute: Attribute, value: f32) -> Self {
        self.set(attribute, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Attribute, f32)> + '_ {
        Attribute::ALL
            .into_iter()
            .map(move |a| (a, self.values[a.index()]))
    }
}

impl Serialize for AttributeScores {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(ATTRIBUTE_COUNT))?;
        for (attribute, value) in self.iter() {
            map.serialize_entry(attribute.as_str(), &value)?;
        }
        map.end()
    }
}

/// Fixed weight profile for one tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightProfile {
    pub tier: Tier,
    /// Indexed by `Attribute::index()`, sums to 1.0
    pub weights: [f32; ATTRIBUTE_COUNT],
    /// Attributes counted towards the core bonus
    pub core: &'static [Attribute],
}

impl WeightProfile {
    pub const GEOMETRY: WeightProfile = WeightProfile {
        tier: Tier::Geometry,
        // round, center, groove, studs, tubes, holes, sym, edge, texture, color, pattern
        weights: [0.12, 0.10, 0.08, 0.20, 0.08, 0.12, 0.08, 0.07, 0.03, 0.10, 0.02],
        core: &[
            Attribute::RoundShape,
            Attribute::CenterStud,
            Attribute::GroovePresence,
            Attribute::StudCount,
            Attribute::HoleCount,
        ],
    };

    pub const STRUCTURAL: WeightProfile = WeightProfile {
        tier: Tier::Structural,
        weights: [0.05, 0.03, 0.05, 0.12, 0.15, 0.20, 0.12, 0.13, 0.05, 0.08, 0.02],
        core: &[
            Attribute::TubePattern,
            Attribute::HoleCount,
            Attribute::Symmetry,
            Attribute::EdgeQuality,
        ],
    };

    pub const SEMANTIC: WeightProfile = WeightProfile {
        tier: Tier::Semantic,
        weights: [0.03, 0.02, 0.02, 0.05, 0.03, 0.03, 0.10, 0.10, 0.20, 0.17, 0.25],
        core: &[
            Attribute::TextureComplexity,
            Attribute::ColorConsistency,
            Attribute::PatternRecognition,
            Attribute::Symmetry,
        ],
    };

    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Geometry => Self::GEOMETRY,
            Tier::Structural => Self::STRUCTURAL,
            Tier::Semantic => Self::SEMANTIC,
        }
    }

    pub fn weight(&self, attribute: Attribute) -> f32 {
        self.weights[attribute.index()]
    }
}

/// Explainable voting outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteBreakdown {
    pub tier: Tier,
    pub scores: AttributeScores,
    pub weighted_sum: f32,
    pub core_matches: usize,
    pub core_bonus_applied: bool,
    pub final_score: f32,
}

/// Weighted voting over attribute sub-scores
#[derive(Debug, Clone)]
pub struct VotingScorer {
    core_bonus: f32,
    core_threshold: f32,
    core_min_matches: usize,
}

impl VotingScorer {
    /// Default scorer: +0.2 bonus when ≥2 core attributes exceed 0.5
    pub fn new() -> Self {
        Self {
            core_bonus: 0.2,
            core_threshold: 0.5,
            core_min_matches: 2,
        }
    }

    /// Score against a single profile
    pub fn vote(&self, scores: &AttributeScores, profile: &WeightProfile) -> VoteBreakdown {
        let weighted_sum: f32 = scores
            .iter()
            .map(|(attribute, value)| value * profile.weight(attribute))
            .sum();

        let core_matches = profile
            .core
            .iter()
            .filter(|a| scores.get(**a) > self.core_threshold)
            .count();
        let core_bonus_applied = core_matches >= self.core_min_matches;

        let bonus = if core_bonus_applied { self.core_bonus } else { 0.0 };
        let final_score = (weighted_sum + bonus).clamp(0.0, 1.0);

        VoteBreakdown {
            tier: profile.tier,
            scores: *scores,
            weighted_sum,
            core_matches,
            core_bonus_applied,
            final_score,
        }
    }

    /// Score with an optional printed-variant blend
    ///
    /// The breakdown keeps the primary profile's core statistics; only the
    /// sums are blended.
    pub fn vote_blended(
        &self,
        scores: &AttributeScores,
        profile: &WeightProfile,
        blend: Option<&TierBlend>,
    ) -> VoteBreakdown {
        let primary = self.vote(scores, profile);
        let Some(blend) = blend else {
            return primary;
        };

        let geometry = self.vote(scores, &WeightProfile::GEOMETRY);
        let semantic = self.vote(scores, &WeightProfile::SEMANTIC);

        VoteBreakdown {
            weighted_sum: blend.geometry * geometry.weighted_sum
                + blend.semantic * semantic.weighted_sum,
            final_score: (blend.geometry * geometry.final_score
                + blend.semantic * semantic.final_score)
                .clamp(0.0, 1.0),
            ..primary
        }
    }
}

impl Default for VotingScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_sum_to_one() {
        for profile in [
            WeightProfile::GEOMETRY,
            WeightProfile::STRUCTURAL,
            WeightProfile::SEMANTIC,
        ] {
            let sum: f32 = profile.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "{} sums to {}", profile.tier, sum);
        }
    }

    #[test]
    fn test_uniform_scores_without_bonus() {
        let scorer = VotingScorer::new();
        let vote = scorer.vote(&AttributeScores::uniform(0.4), &WeightProfile::GEOMETRY);
        assert!((vote.weighted_sum - 0.4).abs() < 1e-5);
        assert_eq!(vote.core_matches, 0);
        assert!(!vote.core_bonus_applied);
        assert!((vote.final_score - 0.4).abs() < 1e-5);
    }

    #[test]
    fn test_core_bonus_needs_two_core_attributes() {
        let scorer = VotingScorer::new();
        let one = AttributeScores::uniform(0.0).with(Attribute::StudCount, 0.9);
        let vote = scorer.vote(&one, &WeightProfile::GEOMETRY);
        assert_eq!(vote.core_matches, 1);
        assert!(!vote.core_bonus_applied);

        let two = one.with(Attribute::HoleCount, 0.6);
        let vote = scorer.vote(&two, &WeightProfile::GEOMETRY);
        assert_eq!(vote.core_matches, 2);
        assert!(vote.core_bonus_applied);
        let expected = 0.9 * 0.20 + 0.6 * 0.12 + 0.2;
        assert!((vote.final_score - expected).abs() < 1e-5);
    }

    #[test]
    fn test_exactly_half_is_not_a_core_match() {
        let scorer = VotingScorer::new();
        let scores = AttributeScores::uniform(0.5);
        let vote = scorer.vote(&scores, &WeightProfile::GEOMETRY);
        assert_eq!(vote.core_matches, 0);
    }

    #[test]
    fn test_final_score_clamped() {
        let scorer = VotingScorer::new();
        let vote = scorer.vote(&AttributeScores::uniform(1.0), &WeightProfile::STRUCTURAL);
        assert_eq!(vote.final_score, 1.0);
    }

    #[test]
    fn test_stud_count_monotonic() {
        let scorer = VotingScorer::new();
        let base = AttributeScores::uniform(0.3).with(Attribute::RoundShape, 0.8);
        let mut previous = 0.0;
        for step in 0..=20 {
            let stud = step as f32 / 20.0;
            let scores = base.with(Attribute::StudCount, stud);
            for profile in [
                WeightProfile::GEOMETRY,
                WeightProfile::STRUCTURAL,
                WeightProfile::SEMANTIC,
            ] {
                let blended = scorer.vote_blended(&scores, &profile, Some(&TierBlend::PRINTED));
                let plain = scorer.vote(&scores, &profile);
                let lower = scorer.vote(&base.with(Attribute::StudCount, (stud - 0.05).max(0.0)), &profile);
                assert!(plain.final_score >= lower.final_score);
                assert!(blended.final_score >= 0.0 && blended.final_score <= 1.0);
            }
            let geometry = scorer.vote(&scores, &WeightProfile::GEOMETRY).final_score;
            assert!(geometry >= previous);
            previous = geometry;
        }
    }

    #[test]
    fn test_blend_mixes_geometry_and_semantic() {
        let scorer = VotingScorer::new();
        let scores = AttributeScores::uniform(0.2)
            .with(Attribute::PatternRecognition, 1.0)
            .with(Attribute::TextureComplexity, 1.0);

        let geometry = scorer.vote(&scores, &WeightProfile::GEOMETRY).final_score;
        let semantic = scorer.vote(&scores, &WeightProfile::SEMANTIC).final_score;
        let blended = scorer
            .vote_blended(&scores, &WeightProfile::GEOMETRY, Some(&TierBlend::PRINTED))
            .final_score;

        assert!((blended - (0.6 * geometry + 0.4 * semantic)).abs() < 1e-5);
        assert!(blended > geometry);
    }

    #[test]
    fn test_breakdown_serializes_attribute_names() {
        let scorer = VotingScorer::new();
        let vote = scorer.vote(&AttributeScores::uniform(0.5), &WeightProfile::GEOMETRY);
        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["tier"], "GEOMETRY");
        assert_eq!(json["scores"]["stud_count"], 0.5);
    }
}
