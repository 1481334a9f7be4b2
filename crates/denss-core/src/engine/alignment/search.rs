use super::optimizer::Params;
use super::score::overlap_score;
use crate::core::models::transform::RigidTransform;
use crate::core::utils::resample::Interpolation;
use crate::engine::cancel::{AbortFlag, RunOutcome};
use nalgebra::Vector3;
use ndarray::Array3;
use std::f64::consts::PI;

/// `count` near-uniform directions `(phi, theta)` on the sphere from the golden spiral.
pub fn golden_spiral(count: usize) -> Vec<(f64, f64)> {
    let golden = PI * (1.0 + 5f64.sqrt());
    (0..count)
        .map(|i| {
            let t = i as f64 + 0.5;
            let phi = (1.0 - 2.0 * t / count as f64).acos();
            let theta = golden * t;
            (phi, theta)
        })
        .collect()
}

/// Rotates `data` about `pivot`, moves the pivot to `center` and translates, all in
/// one resampling pass.
pub fn place(
    data: &Array3<f64>,
    params: &Params,
    pivot: &Vector3<f64>,
    center: &Vector3<f64>,
    order: Interpolation,
) -> Array3<f64> {
    let parameters: [f64; 6] = (*params).into();
    RigidTransform::from_parameters(&parameters).resample(data, pivot, center, order)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub params: Params,
    pub score: f64,
}

/// Scores every spiral orientation (zero translation, order-1 interpolation) and returns
/// the `top` best, highest score first.
pub fn coarse_search(
    reference: &Array3<f64>,
    moving: &Array3<f64>,
    pivot: &Vector3<f64>,
    center: &Vector3<f64>,
    directions: usize,
    top: usize,
    abort: &AbortFlag,
) -> RunOutcome<Vec<Candidate>> {
    let mut candidates = Vec::with_capacity(directions);
    for (phi, theta) in golden_spiral(directions) {
        if abort.is_raised() {
            return RunOutcome::Aborted;
        }
        let params = Params::from_column_slice(&[phi, theta, 0.0, 0.0, 0.0, 0.0]);
        let placed = place(moving, &params, pivot, center, Interpolation::Linear);
        candidates.push(Candidate {
            params,
            score: overlap_score(reference, &placed),
        });
    }
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(top.max(1));
    RunOutcome::Completed(candidates)
}
