//! Similarity primitives
//!
//! Pure functions shared by the orientation comparator and the attribute
//! detectors. All similarities are in [0, 1] except cosine, which keeps its
//! natural [-1, 1] range.

/// Cosine similarity of two vectors
///
/// Returns `None` when the lengths differ, a vector is empty, or either norm
/// is zero. Callers treat `None` as malformed feature data.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return None;
    }

    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !cos.is_finite() {
        return None;
    }
    Some(cos.clamp(-1.0, 1.0) as f32)
}

/// Perceptual color distance (CIE76 ΔE) between two CIELAB colors
pub fn color_distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dl = a[0] - b[0];
    let da = a[1] - b[1];
    let db = a[2] - b[2];
    (dl * dl + da * da + db * db).sqrt()
}

/// Color similarity derived from ΔE: 1 at identical colors, 0 at ΔE ≥ 100
pub fn color_similarity(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    (1.0 - color_distance(a, b) / 100.0).clamp(0.0, 1.0)
}

/// Size-ratio similarity: `min / max` of two positive sizes
pub fn size_ratio_similarity(a: f32, b: f32) -> f32 {
    if !(a > 0.0 && b > 0.0) {
        return 0.0;
    }
    a.min(b) / a.max(b)
}

/// Count-match score: `1 − |detected − expected| / max(expected, 1)`, floored at 0
pub fn count_match(detected: u32, expected: u32) -> f32 {
    let diff = (detected as f32 - expected as f32).abs();
    (1.0 - diff / (expected.max(1) as f32)).max(0.0)
}
