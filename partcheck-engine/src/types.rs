//! Core data model for the part-matching engine
//!
//! Catalog entries and BOM slots are per-session data; detections, score
//! entries and match results exist for a single recognition pass.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::orientation::FlipIndicators;
use crate::tiers::TierBlend;
use crate::voting::WeightProfile;

// ============================================================================
// Keys and tiers
// ============================================================================

/// `(part_id, color_id)` pair identifying one catalog entry
///
/// Also the key space of the hybrid cache. Displays as `"{part_id}_{color_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartKey {
    pub part_id: String,
    pub color_id: i32,
}

impl PartKey {
    pub fn new(part_id: impl Into<String>, color_id: i32) -> Self {
        Self {
            part_id: part_id.into(),
            color_id,
        }
    }

    /// Parse the `"{part_id}_{color_id}"` display form
    ///
    /// The color id is taken after the last underscore so part ids may
    /// themselves contain underscores.
    pub fn parse(s: &str) -> Option<Self> {
        let (part, color) = s.rsplit_once('_')?;
        if part.is_empty() {
            return None;
        }
        let color_id = color.parse().ok()?;
        Some(Self::new(part, color_id))
    }
}

impl fmt::Display for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.part_id, self.color_id)
    }
}

/// Coarse part category controlling attribute weighting and flip policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Plain bricks, plates, tiles: shape and stud layout dominate
    Geometry,
    /// Technic and mechanical parts: holes, tubes, edges dominate
    Structural,
    /// Sculpted or figural parts: texture, print and color dominate
    Semantic,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Geometry => "GEOMETRY",
            Tier::Structural => "STRUCTURAL",
            Tier::Semantic => "SEMANTIC",
        }
    }

    /// Whether a mirrored match may be accepted for parts of this tier
    pub fn allows_flip(&self) -> bool {
        !matches!(self, Tier::Semantic)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GEOMETRY" => Ok(Tier::Geometry),
            "STRUCTURAL" => Ok(Tier::Structural),
            "SEMANTIC" => Ok(Tier::Semantic),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Catalog row as returned by the catalog repository
///
/// Carries no feature data; vectors come from the hybrid cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub part_id: String,
    pub color_id: i32,
    /// Human-readable part name used for tier classification
    #[serde(default)]
    pub name: String,
    /// Pre-assigned tier; classified from the name when absent
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub expected_stud_count: u32,
    #[serde(default)]
    pub expected_hole_count: u32,
    #[serde(default)]
    pub center_stud: bool,
    #[serde(default)]
    pub groove: bool,
    /// Explicit orientation flag; the tier policy applies when absent
    #[serde(default)]
    pub orientation_sensitive: Option<bool>,
    #[serde(default)]
    pub confusable_with: BTreeSet<String>,
}

/// Fully resolved catalog entry used by the scorers
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub part_id: String,
    pub color_id: i32,
    pub name: String,
    pub tier: Tier,
    pub weight_profile: WeightProfile,
    /// Printed-variant blend between two profiles
    pub blend: Option<TierBlend>,
    pub expected_stud_count: u32,
    pub expected_hole_count: u32,
    pub center_stud: bool,
    pub groove: bool,
    pub orientation_sensitive: bool,
    /// 0.0 forbids mirrored matches entirely
    pub flip_tolerance: f32,
    pub confusable_with: BTreeSet<String>,
    /// Canonical shape vector (None when the cache had no vectors)
    pub feature_vector: Option<Vec<f32>>,
    /// Reference color in CIELAB
    pub color_lab: Option<[f32; 3]>,
    /// Reference footprint size in studs
    pub size_studs: Option<f32>,
}

impl CatalogEntry {
    pub fn key(&self) -> PartKey {
        PartKey::new(self.part_id.clone(), self.color_id)
    }

    /// Whether a flipped comparison may win for this entry
    pub fn accepts_flip(&self) -> bool {
        self.tier.allows_flip() && self.flip_tolerance > 0.0
    }
}

// ============================================================================
// BOM
// ============================================================================

/// One line of a kit's bill of materials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomLine {
    pub part_id: String,
    pub color_id: i32,
    pub quantity: u32,
}

impl BomLine {
    pub fn new(part_id: impl Into<String>, color_id: i32, quantity: u32) -> Self {
        Self {
            part_id: part_id.into(),
            color_id,
            quantity,
        }
    }

    pub fn key(&self) -> PartKey {
        PartKey::new(self.part_id.clone(), self.color_id)
    }
}

/// One physically expected unit of a BOM line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomSlot {
    pub part_id: String,
    pub color_id: i32,
    /// Index of this unit within its BOM line (0..quantity)
    pub slot_index: u32,
    pub matched: bool,
    /// Accepted score for matched slots, best remaining score otherwise
    pub match_score: Option<f32>,
    pub matched_detection: Option<DetectionRef>,
    /// Best unassigned candidate for slots left in hold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_candidate: Option<DetectionRef>,
}

impl BomSlot {
    pub fn new(part_id: impl Into<String>, color_id: i32, slot_index: u32) -> Self {
        Self {
            part_id: part_id.into(),
            color_id,
            slot_index,
            matched: false,
            match_score: None,
            matched_detection: None,
            best_candidate: None,
        }
    }

    pub fn key(&self) -> PartKey {
        PartKey::new(self.part_id.clone(), self.color_id)
    }
}

// ============================================================================
// Detections
// ============================================================================

/// Axis-aligned bounding box in image pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Scalar measurements reported by the detector for one object
///
/// Every field is optional; absent values make the corresponding attribute
/// detector abstain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Observations {
    pub round_shape: Option<f32>,
    pub center_stud: Option<f32>,
    pub groove: Option<f32>,
    pub stud_count: Option<u32>,
    pub tube_pattern: Option<f32>,
    pub hole_count: Option<u32>,
    pub symmetry: Option<f32>,
    pub edge_quality: Option<f32>,
    pub texture_complexity: Option<f32>,
    pub pattern: Option<f32>,
}

/// A candidate object produced by the detector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    /// Detector-assigned identifier, unique within one pass
    pub id: String,
    #[serde(default)]
    pub bbox: BoundingBox,
    /// Optional polygon mask in image pixels
    #[serde(default)]
    pub mask: Option<Vec<[f32; 2]>>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub feature_vector: Option<Vec<f32>>,
    /// Estimated color in CIELAB
    #[serde(default)]
    pub color_lab: Option<[f32; 3]>,
    /// Estimated footprint size in studs
    #[serde(default)]
    pub size_studs: Option<f32>,
    #[serde(default)]
    pub flip_signals: Option<FlipIndicators>,
    #[serde(default)]
    pub observations: Observations,
}

/// Reference to a detection inside one pass
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DetectionRef {
    /// Position in the pass's detection list
    pub index: usize,
    pub id: String,
}

// ============================================================================
// Scoring and results
// ============================================================================

/// Score of one (detection, slot) pair within a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreEntry {
    pub detection_index: usize,
    /// Index into the pass's expanded slot list
    pub slot_ref: usize,
    pub raw_score: f32,
    pub penalty: f32,
    pub final_score: f32,
    pub core_matches_count: usize,
    /// Set when the default score was substituted for missing data
    pub low_confidence: bool,
    pub is_flipped: bool,
}

/// One accepted (detection, slot, score) triple
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotMatch {
    pub detection: DetectionRef,
    pub slot: BomSlot,
    pub score: f32,
}

/// Final partition of a matching pass
///
/// Every expanded slot appears in exactly one of `matches`, `missing` and
/// `hold`. Detections not assigned to any slot are listed separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResult {
    pub matches: Vec<SlotMatch>,
    pub missing: Vec<BomSlot>,
    pub hold: Vec<BomSlot>,
    pub unmatched_detections: Vec<DetectionRef>,
}

impl MatchResult {
    pub fn total_slots(&self) -> usize {
        self.matches.len() + self.missing.len() + self.hold.len()
    }
}
