//! BOM slot expansion

use std::collections::{HashMap, HashSet};

use super::MatchError;
use crate::types::{BomLine, BomSlot, PartKey};

/// Expand BOM lines into one slot per expected unit
///
/// Repeated lines for the same `(part, color)` continue the slot numbering
/// instead of restarting it. Zero-quantity lines produce no slots. The
/// total is checked against `max_slots` before anything is allocated.
pub fn expand_slots(bom: &[BomLine], max_slots: usize) -> Result<Vec<BomSlot>, MatchError> {
    let total = slot_count(bom)
        .filter(|&n| n <= max_slots)
        .ok_or_else(|| {
            MatchError::InputTooLarge(format!("BOM expands beyond {} slots", max_slots))
        })?;
    let mut slots = Vec::with_capacity(total);
    let mut next_index: HashMap<PartKey, u32> = HashMap::new();

    for line in bom {
        let counter = next_index.entry(line.key()).or_insert(0);
        for _ in 0..line.quantity {
            slots.push(BomSlot::new(line.part_id.clone(), line.color_id, *counter));
            *counter += 1;
        }
    }

    verify_unique(&slots)?;
    Ok(slots)
}

/// Total slot count, `None` on overflow
fn slot_count(bom: &[BomLine]) -> Option<usize> {
    bom.iter()
        .try_fold(0usize, |acc, line| acc.checked_add(usize::try_from(line.quantity).ok()?))
}

/// Every `(part, color, slot_index)` must be unique
pub fn verify_unique(slots: &[BomSlot]) -> Result<(), MatchError> {
    let mut seen = HashSet::with_capacity(slots.len());
    for slot in slots {
        if !seen.insert((slot.part_id.as_str(), slot.color_id, slot.slot_index)) {
            return Err(MatchError::Invariant(format!(
                "slot {}_{}#{} expanded twice",
                slot.part_id, slot.color_id, slot.slot_index
            )));
        }
    }
    Ok(())
}

/// Distinct keys in first-seen order
pub fn distinct_keys(slots: &[BomSlot]) -> Vec<PartKey> {
    let mut seen = HashSet::new();
    slots
        .iter()
        .map(BomSlot::key)
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 10_000;

    #[test]
    fn test_quantity_expands_to_slots() {
        let slots = expand_slots(&[BomLine::new("3001", 0, 2), BomLine::new("3020", 4, 1)], LIMIT).unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(
            slots.iter().map(|s| (s.part_id.as_str(), s.slot_index)).collect::<Vec<_>>(),
            vec![("3001", 0), ("3001", 1), ("3020", 0)]
        );
    }

    #[test]
    fn test_repeated_lines_continue_numbering() {
        let slots = expand_slots(&[BomLine::new("3001", 0, 1), BomLine::new("3001", 0, 2)], LIMIT).unwrap();
        let indices: Vec<u32> = slots.iter().map(|s| s.slot_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_quantity_line() {
        let slots = expand_slots(&[BomLine::new("3001", 0, 0)], LIMIT).unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn test_huge_quantity_rejected_before_allocation() {
        let err = expand_slots(&[BomLine::new("3001", 0, u32::MAX)], LIMIT).unwrap_err();
        assert!(matches!(err, MatchError::InputTooLarge(_)));
    }

    #[test]
    fn test_slot_limit_applies_to_line_sum() {
        let bom = [BomLine::new("3001", 0, 6), BomLine::new("3020", 4, 5)];
        assert!(matches!(expand_slots(&bom, 10), Err(MatchError::InputTooLarge(_))));
        assert_eq!(expand_slots(&bom, 11).unwrap().len(), 11);
    }

    #[test]
    fn test_slot_count_sums_lines() {
        let bom = [
            BomLine::new("3001", 0, u32::MAX),
            BomLine::new("3020", 4, u32::MAX),
        ];
        assert!(matches!(expand_slots(&bom, LIMIT), Err(MatchError::InputTooLarge(_))));
        assert_eq!(slot_count(&[]), Some(0));
    }

    #[test]
    fn test_duplicate_slot_is_invariant_failure() {
        let slots = vec![BomSlot::new("3001", 0, 0), BomSlot::new("3001", 0, 0)];
        assert!(matches!(verify_unique(&slots), Err(MatchError::Invariant(_))));
    }

    #[test]
    fn test_distinct_keys_preserve_order() {
        let slots = expand_slots(
            &[
                BomLine::new("3020", 4, 2),
                BomLine::new("3001", 0, 1),
                BomLine::new("3020", 4, 1),
            ],
            LIMIT,
        )
        .unwrap();
        let keys = distinct_keys(&slots);
        assert_eq!(keys, vec![PartKey::new("3020", 4), PartKey::new("3001", 0)]);
    }
}
