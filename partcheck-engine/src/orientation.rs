//! Orientation-aware feature comparison
//!
//! Compares a detection's shape vector against a catalog entry's canonical
//! vector and its mirror image. Feature vectors are laid out as `(x, y, d)`
//! triples: two spatial axes followed by a depth/channel component. The
//! mirror negates the spatial axes of every complete triple and leaves the
//! depth component (and any trailing partial group) untouched.

use serde::{Deserialize, Serialize};

use crate::similarity::cosine_similarity;

/// Components per spatial group in a feature vector
pub const GROUP_SIZE: usize = 3;

/// Mirror a feature vector
///
/// Applying it twice yields the original vector.
pub fn flip_feature_vector(v: &[f32]) -> Vec<f32> {
    let mut flipped = v.to_vec();
    for group in flipped.chunks_exact_mut(GROUP_SIZE) {
        group[0] = -group[0];
        group[1] = -group[1];
    }
    flipped
}

/// Independent flip indicators reported by the detector
///
/// Each is a [0, 1] score of how strongly that cue suggests the object is
/// seen mirrored or upside down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlipIndicators {
    pub tube_hole_pattern: f32,
    pub edge_orientation: f32,
    pub brightness_pattern: f32,
    pub symmetry: f32,
    pub stud_pattern: f32,
}

impl FlipIndicators {
    const TUBE_HOLE_WEIGHT: f32 = 0.30;
    const STUD_WEIGHT: f32 = 0.25;
    const EDGE_WEIGHT: f32 = 0.20;
    const SYMMETRY_WEIGHT: f32 = 0.15;
    const BRIGHTNESS_WEIGHT: f32 = 0.10;

    /// Weighted diagnostic flip score in [0, 1]
    ///
    /// Explanatory only; never used as the match score.
    pub fn flip_score(&self) -> f32 {
        let score = self.tube_hole_pattern.clamp(0.0, 1.0) * Self::TUBE_HOLE_WEIGHT
            + self.stud_pattern.clamp(0.0, 1.0) * Self::STUD_WEIGHT
            + self.edge_orientation.clamp(0.0, 1.0) * Self::EDGE_WEIGHT
            + self.symmetry.clamp(0.0, 1.0) * Self::SYMMETRY_WEIGHT
            + self.brightness_pattern.clamp(0.0, 1.0) * Self::BRIGHTNESS_WEIGHT;
        score.clamp(0.0, 1.0)
    }
}

/// Outcome of one orientation-aware comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrientationComparison {
    pub normal_similarity: f32,
    pub flipped_similarity: f32,
    pub is_flipped: bool,
    pub flip_score: Option<f32>,
    /// Effective similarity after applying the flip policy
    pub confidence: f32,
    /// A flipped match scored higher but the policy refused it
    pub flip_rejected: bool,
}

/// Compare a detection vector against a canonical catalog vector
///
/// Returns `None` if the vectors cannot be compared (length mismatch, empty
/// or zero-norm), which callers treat as missing feature data.
pub fn compare(
    detection: &[f32],
    canonical: &[f32],
    allow_flip: bool,
    indicators: Option<&FlipIndicators>,
) -> Option<OrientationComparison> {
    let normal_similarity = cosine_similarity(detection, canonical)?;
    let mirrored = flip_feature_vector(canonical);
    let flipped_similarity = cosine_similarity(detection, &mirrored)?;

    let is_flipped = flipped_similarity > normal_similarity;
    let (confidence, flip_rejected) = if allow_flip {
        (normal_similarity.max(flipped_similarity), false)
    } else {
        (normal_similarity, is_flipped)
    };

    Some(OrientationComparison {
        normal_similarity,
        flipped_similarity,
        is_flipped,
        flip_score: indicators.map(FlipIndicators::flip_score),
        confidence,
        flip_rejected,
    })
}
