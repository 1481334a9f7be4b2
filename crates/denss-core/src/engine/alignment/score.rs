use ndarray::{Array3, Zip};

/// Normalized overlap between two maps, `Σ|a·b| / (√Σa² · √Σb²)`.
///
/// Equals 1 for identical (or proportional) maps and 0 when either map is empty.
pub fn overlap_score(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    let mut cross = 0.0;
    let mut aa = 0.0;
    let mut bb = 0.0;
    Zip::from(a).and(b).for_each(|&x, &y| {
        cross += (x * y).abs();
        aa += x * x;
        bb += y * y;
    });
    let denominator = 2.0 * aa.sqrt() * bb.sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    2.0 * cross / denominator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_maps_score_one() {
        let a = Array3::from_shape_fn((5, 5, 5), |(i, j, k)| (i * j + k) as f64 - 3.0);
        assert!((overlap_score(&a, &a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn score_is_scale_invariant() {
        let a = Array3::from_shape_fn((4, 4, 4), |(i, j, k)| (i + 2 * j + 3 * k) as f64);
        let b = a.mapv(|v| v * 7.5);
        assert!((overlap_score(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn disjoint_maps_score_zero() {
        let mut a = Array3::zeros((4, 4, 4));
        let mut b = Array3::zeros((4, 4, 4));
        a[[0, 0, 0]] = 1.0;
        b[[3, 3, 3]] = 1.0;
        assert_eq!(overlap_score(&a, &b), 0.0);
        assert_eq!(overlap_score(&a, &Array3::zeros((4, 4, 4))), 0.0);
    }
}
