//! Tier classification for catalog parts
//!
//! Assigns each part to GEOMETRY, STRUCTURAL or SEMANTIC. The default
//! classifier is keyword based: SEMANTIC terms are checked first, then
//! STRUCTURAL terms, and anything else falls back to GEOMETRY. Printed
//! variants additionally get a GEOMETRY/SEMANTIC blend hint.
//!
//! The heuristic lives behind [`TierClassifier`] so a config-driven or
//! learned classifier can replace it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::types::{CatalogRecord, Tier};

/// Input to tier classification
#[derive(Debug, Clone, Copy)]
pub struct PartDescriptor<'a> {
    pub part_id: &'a str,
    pub name: &'a str,
}

impl<'a> From<&'a CatalogRecord> for PartDescriptor<'a> {
    fn from(record: &'a CatalogRecord) -> Self {
        Self {
            part_id: &record.part_id,
            name: &record.name,
        }
    }
}

/// Blend weights applied when scoring printed variants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBlend {
    pub geometry: f32,
    pub semantic: f32,
}

impl TierBlend {
    /// Printed parts: shape still matters most, print adds semantic evidence
    pub const PRINTED: TierBlend = TierBlend {
        geometry: 0.6,
        semantic: 0.4,
    };
}

/// Classification outcome
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierAssignment {
    pub tier: Tier,
    /// Classifier confidence (0.0-1.0)
    pub confidence: f32,
    pub orientation_sensitive: bool,
    /// 0.0 forbids mirrored matches, 1.0 accepts them freely
    pub flip_tolerance: f32,
    pub blend: Option<TierBlend>,
}

impl TierAssignment {
    /// Orientation policy attached to a tier
    pub fn for_tier(tier: Tier, confidence: f32) -> Self {
        let (orientation_sensitive, flip_tolerance) = match tier {
            Tier::Geometry => (false, 1.0),
            Tier::Structural => (true, 0.5),
            Tier::Semantic => (true, 0.0),
        };
        Self {
            tier,
            confidence: confidence.clamp(0.0, 1.0),
            orientation_sensitive,
            flip_tolerance,
            blend: None,
        }
    }
}

/// Swappable tier classifier
pub trait TierClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn classify(&self, part: &PartDescriptor<'_>) -> TierAssignment;
}

// Keywords match whole words, with an optional plural suffix. Entries
// ending in `\w*` are stems that match any continuation.

/// Sculpted, figural and decorative terms
const SEMANTIC_KEYWORDS: &[&str] = &[
    r"minifig\w*", "figure", "torso", "head", "hair", "headgear", "helmet", "animal", "creature",
    "horse", "dragon", "bird", "fish", r"sculpt\w*", "statue", "plant", "flower", "leaf", "leaves",
    "tree", r"decorat\w*", "ornament", "face", "cape", "weapon", "sword", r"accessor\w*",
    "utensil",
];

/// Mechanical and Technic terms
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "technic", "axle", "pin", "gear", "beam", "liftarm", "connector", "bush", "hinge", "joint",
    "shock", "differential", "worm", "cam", "steering", "crankshaft", "bracket", "clip",
    "turntable", "panel",
];

/// Plain shape terms; only raise confidence, never change the tier
const GEOMETRY_KEYWORDS: &[&str] = &[
    "brick", "plate", "tile", "slope", "round", "wedge", "arch", "cylinder", "cone", "dish",
];

struct KeywordPatterns {
    semantic: Regex,
    structural: Regex,
    geometry: Regex,
}

fn keyword_pattern(keywords: &[&str]) -> Regex {
    let alternatives = keywords.join("|");
    Regex::new(&format!(r"(?i)\b(?:{})(?:e?s)?\b", alternatives)).expect("valid keyword pattern")
}

fn keyword_patterns() -> &'static KeywordPatterns {
    static PATTERNS: OnceLock<KeywordPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| KeywordPatterns {
        semantic: keyword_pattern(SEMANTIC_KEYWORDS),
        structural: keyword_pattern(STRUCTURAL_KEYWORDS),
        geometry: keyword_pattern(GEOMETRY_KEYWORDS),
    })
}

fn printed_variant_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // e.g. 3001pr0001, 3626bpb0123, 973pr1234c01
        Regex::new(r"(?i)p[rb]\d{2,}").expect("valid printed-variant pattern")
    })
}

/// Rule-based classifier over the part name and identifier
#[derive(Debug, Clone, Default)]
pub struct KeywordTierClassifier;

impl KeywordTierClassifier {
    pub fn new() -> Self {
        Self
    }

    /// First keyword occurrence in `haystack`, as written there
    fn find_keyword<'h>(pattern: &Regex, haystack: &'h str) -> Option<&'h str> {
        pattern.find(haystack).map(|m| m.as_str())
    }

    /// Whether the identifier or name marks a printed variant
    pub fn is_printed_variant(part: &PartDescriptor<'_>) -> bool {
        printed_variant_pattern().is_match(part.part_id)
            || part.name.to_ascii_lowercase().contains("print")
    }
}

impl TierClassifier for KeywordTierClassifier {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn classify(&self, part: &PartDescriptor<'_>) -> TierAssignment {
        let patterns = keyword_patterns();
        let name = part.name;

        let mut assignment = if let Some(kw) = Self::find_keyword(&patterns.semantic, name) {
            debug!(part_id = part.part_id, keyword = kw, "Classified SEMANTIC");
            TierAssignment::for_tier(Tier::Semantic, 0.85)
        } else if let Some(kw) = Self::find_keyword(&patterns.structural, name) {
            debug!(part_id = part.part_id, keyword = kw, "Classified STRUCTURAL");
            TierAssignment::for_tier(Tier::Structural, 0.8)
        } else if patterns.geometry.is_match(name) {
            TierAssignment::for_tier(Tier::Geometry, 0.75)
        } else {
            TierAssignment::for_tier(Tier::Geometry, 0.5)
        };

        // Printed plain parts keep GEOMETRY but blend in the semantic profile
        if assignment.tier == Tier::Geometry && Self::is_printed_variant(part) {
            assignment.blend = Some(TierBlend::PRINTED);
        }

        assignment
    }
}
