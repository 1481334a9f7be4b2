use nalgebra::Vector3;
use ndarray::Array3;

/// Center of mass in fractional index coordinates.
///
/// Returns `None` when the total mass is zero, in which case no meaningful center exists.
pub fn center_of_mass(data: &Array3<f64>) -> Option<Vector3<f64>> {
    let mut total = 0.0;
    let mut weighted = Vector3::zeros();
    for ((i, j, k), &value) in data.indexed_iter() {
        total += value;
        weighted += Vector3::new(i as f64, j as f64, k as f64) * value;
    }
    if total == 0.0 || !total.is_finite() {
        return None;
    }
    Some(weighted / total)
}

/// Index of the largest value, first occurrence wins.
pub fn argmax_index(data: &Array3<f64>) -> Vector3<f64> {
    let mut best = f64::NEG_INFINITY;
    let mut best_idx = (0, 0, 0);
    for (idx, &value) in data.indexed_iter() {
        if value > best {
            best = value;
            best_idx = idx;
        }
    }
    Vector3::new(best_idx.0 as f64, best_idx.1 as f64, best_idx.2 as f64)
}

/// Arithmetic mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}
