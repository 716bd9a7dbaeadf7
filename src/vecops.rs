//! Vector math over embedding slices.
//!
//! All catalog embeddings are L2-normalized upstream; normalizing again on
//! load is cheap and defends against manifest drift.

/// Dot product of two equal-length slices. Returns 0.0 on length mismatch.
#[allow(dead_code)]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm.
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity remapped from [-1, 1] to [0, 1].
///
/// The composite scoring weights and learning-rate tables were tuned against
/// the remapped range; keep the `(x + 1) / 2` remap when touching this.
/// Mismatched lengths score 0.0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Return `v / ‖v‖₂`. A zero vector normalizes to the uniform unit vector
/// `1/√D` in every component so downstream cosine math never sees NaN.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let n = norm(v);
    if n > 0.0 && n.is_finite() {
        v.iter().map(|x| x / n).collect()
    } else {
        let uniform = 1.0 / (v.len().max(1) as f32).sqrt();
        vec![uniform; v.len()]
    }
}

/// Scale `v` in place so its norm does not exceed `cap`.
pub fn clip_norm(v: &mut [f32], cap: f32) {
    let n = norm(v);
    if n > cap && n > 0.0 {
        let scale = cap / n;
        for x in v.iter_mut() {
            *x *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_unit_vectors() {
        let v = normalize(&[1.0, 2.0, 3.0]);
        let c = cosine(&v, &v);
        assert!((c - 1.0).abs() < 1e-6, "self-cosine should be 1.0, got {c}");
    }

    #[test]
    fn test_cosine_opposite_vectors() {
        let a = [1.0, 0.0];
        let b = [-1.0, 0.0];
        let c = cosine(&a, &b);
        assert!(c.abs() < 1e-6, "opposite vectors remap to 0.0, got {c}");
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let c = cosine(&a, &b);
        assert!((c - 0.5).abs() < 1e-6, "orthogonal remaps to 0.5, got {c}");
    }

    #[test]
    fn test_cosine_length_mismatch_is_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_range_for_unit_vectors() {
        let vs = [
            normalize(&[0.3, -0.7, 0.2]),
            normalize(&[-1.0, 4.0, 0.01]),
            normalize(&[5.0, 5.0, 5.0]),
        ];
        for a in &vs {
            for b in &vs {
                let c = cosine(a, b);
                assert!((0.0..=1.0).contains(&c), "cosine out of range: {c}");
            }
        }
    }

    #[test]
    fn test_normalize_unit_norm() {
        let v = normalize(&[3.0, 4.0]);
        assert!((norm(&v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_is_uniform() {
        let v = normalize(&[0.0; 4]);
        let expected = 1.0 / 2.0; // 1/sqrt(4)
        for x in &v {
            assert!((x - expected).abs() < 1e-6);
        }
        assert!((norm(&v) - 1.0).abs() < 1e-6);
        assert!(v.iter().all(|x| x.is_finite()), "no NaNs may escape");
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = normalize(&[0.1, 0.9, -0.3]);
        let twice = normalize(&once);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_clip_norm_scales_down_uniformly() {
        let mut v = vec![3.0, 4.0]; // norm 5
        clip_norm(&mut v, 0.5);
        assert!((norm(&v) - 0.5).abs() < 1e-6);
        // Direction preserved
        assert!((v[0] / v[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_clip_norm_leaves_small_vectors_alone() {
        let mut v = vec![0.1, 0.2];
        let before = v.clone();
        clip_norm(&mut v, 0.5);
        assert_eq!(v, before);
    }

    #[test]
    fn test_dot_mismatch_is_zero() {
        assert_eq!(dot(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
