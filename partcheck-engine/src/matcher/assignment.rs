//! Greedy slot assignment and result partitioning

use std::collections::HashSet;

use super::{MatchError, MatchingConfig};
use crate::types::{BomSlot, DetectionRef, MatchResult, ScoreEntry, SlotMatch};

/// Accept pairs in descending final-score order
///
/// Ties keep score-matrix order (detection-major, then slot order), so the
/// result is deterministic. Returns indices into `scores`.
pub fn greedy_assign(
    scores: &[ScoreEntry],
    detection_count: usize,
    slot_count: usize,
    accept_threshold: f32,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len())
        .filter(|&i| scores[i].final_score >= accept_threshold)
        .collect();
    order.sort_by(|&a, &b| scores[b].final_score.total_cmp(&scores[a].final_score));

    let mut detection_used = vec![false; detection_count];
    let mut slot_used = vec![false; slot_count];
    let mut accepted = Vec::new();

    for i in order {
        let entry = &scores[i];
        let (Some(det), Some(slot)) = (
            detection_used.get(entry.detection_index).copied(),
            slot_used.get(entry.slot_ref).copied(),
        ) else {
            continue;
        };
        if det || slot {
            continue;
        }
        detection_used[entry.detection_index] = true;
        slot_used[entry.slot_ref] = true;
        accepted.push(i);
    }
    accepted
}

/// Split slots into matched / hold / missing
///
/// An unassigned slot goes to hold when its best score among unconsumed
/// detections lies strictly inside `(low_threshold, accept_threshold)`.
pub fn partition(
    slots: Vec<BomSlot>,
    detections: &[DetectionRef],
    scores: &[ScoreEntry],
    assigned: &[usize],
    config: &MatchingConfig,
) -> MatchResult {
    let mut assigned_by_slot: Vec<Option<&ScoreEntry>> = vec![None; slots.len()];
    let mut consumed: HashSet<usize> = HashSet::with_capacity(assigned.len());
    for &i in assigned {
        let entry = &scores[i];
        assigned_by_slot[entry.slot_ref] = Some(entry);
        consumed.insert(entry.detection_index);
    }

    let mut best_remaining: Vec<Option<&ScoreEntry>> = vec![None; slots.len()];
    for entry in scores {
        if consumed.contains(&entry.detection_index) {
            continue;
        }
        let best = &mut best_remaining[entry.slot_ref];
        if best.map_or(true, |b| entry.final_score > b.final_score) {
            *best = Some(entry);
        }
    }

    let mut result = MatchResult::default();
    for (slot_ref, mut slot) in slots.into_iter().enumerate() {
        if let Some(entry) = assigned_by_slot[slot_ref] {
            let detection = detections[entry.detection_index].clone();
            slot.matched = true;
            slot.match_score = Some(entry.final_score);
            slot.matched_detection = Some(detection.clone());
            result.matches.push(SlotMatch {
                detection,
                slot,
                score: entry.final_score,
            });
            continue;
        }

        match best_remaining[slot_ref] {
            Some(best)
                if best.final_score > config.low_threshold
                    && best.final_score < config.accept_threshold =>
            {
                slot.match_score = Some(best.final_score);
                slot.best_candidate = Some(detections[best.detection_index].clone());
                result.hold.push(slot);
            }
            best => {
                slot.match_score = best.map(|b| b.final_score);
                result.missing.push(slot);
            }
        }
    }

    result.unmatched_detections = detections
        .iter()
        .filter(|d| !consumed.contains(&d.index))
        .cloned()
        .collect();
    result
}

/// Check the partition invariants of a finished pass
pub fn verify_partition(result: &MatchResult, detection_count: usize) -> Result<(), MatchError> {
    let mut seen_slots = HashSet::new();
    let all_slots = result
        .matches
        .iter()
        .map(|m| &m.slot)
        .chain(&result.missing)
        .chain(&result.hold);
    for slot in all_slots {
        if !seen_slots.insert((slot.part_id.as_str(), slot.color_id, slot.slot_index)) {
            return Err(MatchError::Invariant(format!(
                "slot {}_{}#{} appears in more than one partition",
                slot.part_id, slot.color_id, slot.slot_index
            )));
        }
    }

    let mut seen_detections = HashSet::new();
    for m in &result.matches {
        if !seen_detections.insert(m.detection.index) {
            return Err(MatchError::Invariant(format!(
                "detection {} assigned to more than one slot",
                m.detection.id
            )));
        }
    }

    if seen_detections.len() + result.unmatched_detections.len() != detection_count {
        return Err(MatchError::Invariant(format!(
            "{} matched + {} unmatched detections, expected {}",
            seen_detections.len(),
            result.unmatched_detections.len(),
            detection_count
        )));
    }
    Ok(())
}
