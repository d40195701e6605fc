// Vector and ranking helpers shared by the scorer and the embedding index

use std::cmp::Ordering;

/// Scores closer than this are treated as tied when ranking.
pub const SCORE_RESOLUTION: f64 = 1e-9;

pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum()
}

pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// Cosine similarity clamped to [-1, 1]. Zero vectors and length mismatches
/// yield 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Normalize in place to unit length. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (*x as f64 / norm) as f32;
        }
    }
}

/// Integer ranking key at `SCORE_RESOLUTION`; `None` when the quantized
/// value does not fit in an i64.
fn quantize(score: f64) -> Option<i64> {
    let scaled = (score / SCORE_RESOLUTION).round();
    if scaled.abs() < i64::MAX as f64 {
        Some(scaled as i64)
    } else {
        None
    }
}

/// Descending score order. Scores within `SCORE_RESOLUTION` tie, scores too
/// large to quantize compare exactly, non-finite scores sink to the bottom.
fn compare_scores(a: f64, b: f64) -> Ordering {
    match (a.is_finite(), b.is_finite()) {
        (false, false) => Ordering::Equal,
        (false, true) => Ordering::Greater,
        (true, false) => Ordering::Less,
        (true, true) => match (quantize(a), quantize(b)) {
            (Some(qa), Some(qb)) => qb.cmp(&qa),
            _ => b.total_cmp(&a),
        },
    }
}

/// Descending by score, ties broken by ascending id.
pub fn compare_ranked(a_id: &str, a_score: f64, b_id: &str, b_score: f64) -> Ordering {
    compare_scores(a_score, b_score).then_with(|| a_id.cmp(b_id))
}
