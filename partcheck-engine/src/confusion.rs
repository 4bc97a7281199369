//! Confusion penalties for known look-alike parts
//!
//! When two parts that are easily mistaken for one another are both
//! plausible candidates for the same detection, each one's score is reduced
//! by the configured penalty. Penalties are computed per decision and never
//! mutate shared state.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::types::{CatalogEntry, PartKey};

/// Penalty used for look-alikes declared on catalog entries without an
/// explicit table value
pub const DEFAULT_ENTRY_PENALTY: f32 = 0.1;

/// Built-in symmetric look-alike pairs: (part, part, penalty)
const BUILTIN_CONFUSIONS: &[(&str, &str, f32)] = &[
    // Bricks differing by one stud row
    ("3001", "3002", 0.15),
    ("3003", "3004", 0.10),
    ("3009", "3010", 0.15),
    // Brick vs round brick
    ("3005", "3062b", 0.20),
    // Plates vs tiles of the same footprint
    ("3024", "3070b", 0.20),
    ("3023", "3069b", 0.20),
    ("3022", "3068b", 0.20),
    ("3710", "2431", 0.20),
    // Round plate vs round tile
    ("4073", "98138", 0.25),
    // Slopes
    ("3039", "3040", 0.15),
    // Technic pins with and without friction
    ("2780", "3673", 0.30),
    ("6558", "32556", 0.30),
    // Bush vs half bush
    ("3713", "4265c", 0.25),
    // Axles differing by one unit
    ("3705", "32073", 0.20),
];

/// A candidate for one detection before/after penalty adjustment
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub part_id: String,
    pub color_id: i32,
    pub score: f32,
    pub penalty: f32,
}

impl Candidate {
    pub fn new(part_id: impl Into<String>, score: f32) -> Self {
        Self {
            part_id: part_id.into(),
            color_id: 0,
            score,
            penalty: 0.0,
        }
    }

    pub fn for_key(key: &PartKey, score: f32) -> Self {
        Self {
            part_id: key.part_id.clone(),
            color_id: key.color_id,
            score,
            penalty: 0.0,
        }
    }
}

/// Static map `part_id → {confusable_part_id → penalty}`
#[derive(Debug, Clone, Default)]
pub struct ConfusionTable {
    entries: HashMap<String, HashMap<String, f32>>,
}

impl ConfusionTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table preloaded with the built-in look-alike groups
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (a, b, penalty) in BUILTIN_CONFUSIONS {
            table.insert_pair(a, b, *penalty);
        }
        table
    }

    /// Register a symmetric look-alike pair (penalty clamped to [0, 1])
    pub fn insert_pair(&mut self, a: &str, b: &str, penalty: f32) {
        if a == b {
            return;
        }
        let penalty = penalty.clamp(0.0, 1.0);
        self.entries
            .entry(a.to_string())
            .or_default()
            .insert(b.to_string(), penalty);
        self.entries
            .entry(b.to_string())
            .or_default()
            .insert(a.to_string(), penalty);
    }

    /// Add pairs declared on catalog entries; explicit table values win
    pub fn extend_from_entries<'a>(&mut self, entries: impl IntoIterator<Item = &'a CatalogEntry>) {
        for entry in entries {
            for other in &entry.confusable_with {
                if self.penalty(&entry.part_id, other).is_none() {
                    self.insert_pair(&entry.part_id, other, DEFAULT_ENTRY_PENALTY);
                }
            }
        }
    }

    pub fn penalty(&self, part_id: &str, other: &str) -> Option<f32> {
        self.entries.get(part_id)?.get(other).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum::<usize>() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply penalties to one detection's candidate list
    ///
    /// Candidates scoring below `candidate_floor` never penalize others.
    /// Each confusable id is counted once even when it occurs several times
    /// in the list. The adjusted score is floored at 0 and the list is
    /// re-sorted by descending score (stable).
    pub fn apply(&self, candidates: &[Candidate], candidate_floor: f32) -> Vec<Candidate> {
        let present: HashSet<&str> = candidates
            .iter()
            .filter(|c| c.score >= candidate_floor)
            .map(|c| c.part_id.as_str())
            .collect();

        let mut adjusted: Vec<Candidate> = candidates
            .iter()
            .map(|c| {
                let penalty: f32 = match self.entries.get(&c.part_id) {
                    Some(confusions) => confusions
                        .iter()
                        .filter(|(other, _)| present.contains(other.as_str()))
                        .map(|(_, p)| *p)
                        .sum(),
                    None => 0.0,
                };

                if penalty > 0.0 {
                    debug!(
                        part_id = %c.part_id,
                        raw_score = c.score,
                        penalty,
                        "Confusion penalty applied"
                    );
                }

                Candidate {
                    part_id: c.part_id.clone(),
                    color_id: c.color_id,
                    score: (c.score - penalty).max(0.0),
                    penalty,
                }
            })
            .collect();

        adjusted.sort_by(|a, b| b.score.total_cmp(&a.score));
        adjusted
    }
}
