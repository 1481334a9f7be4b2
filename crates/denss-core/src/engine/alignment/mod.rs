//! Rigid-body registration of one density map onto another.
//!
//! Alignment runs in two stages: a coarse scan of golden-spiral orientations scored on
//! absolute densities ([`search`]), then bounded quasi-Newton refinement of the best
//! candidates over three angles and three translations ([`optimizer`]). The overlap
//! score in [`score`] is the figure of merit throughout.

pub mod optimizer;
pub mod principal;
pub mod score;
pub mod search;

use self::optimizer::{BoundedBfgs, Params};
use self::score::overlap_score;
use self::search::{coarse_search, place};
use super::cancel::{AbortFlag, RunOutcome};
use super::config::AlignmentConfig;
use super::error::EngineError;
use crate::core::models::density::DensityMap;
use crate::core::models::transform::RigidTransform;
use crate::core::utils::resample::{self, Interpolation};
use nalgebra::Vector3;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// The moving map placed onto the reference, with its electron count preserved.
    pub map: DensityMap,
    pub score: f64,
    /// Applied about the moving map's center of mass, which lands on the grid center.
    pub transform: RigidTransform,
}

#[derive(Debug, Clone, Default)]
pub struct Aligner {
    config: AlignmentConfig,
}

impl Aligner {
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    fn optimizer(&self) -> BoundedBfgs {
        let a = self.config.angle_bound;
        let t = self.config.translation_bound;
        BoundedBfgs {
            lower: Params::from_column_slice(&[-a, -a, -a, -t, -t, -t]),
            upper: Params::from_column_slice(&[a, a, a, t, t, t]),
            step: self.config.finite_difference_step,
            max_iterations: self.config.max_iterations,
            max_evaluations: self.config.max_evaluations,
        }
    }

    /// Finds the rigid transform that best superimposes `moving` onto `reference`.
    pub fn align(
        &self,
        reference: &DensityMap,
        moving: &DensityMap,
        abort: &AbortFlag,
    ) -> Result<RunOutcome<AlignmentResult>, EngineError> {
        if reference.n() != moving.n() {
            return Err(EngineError::GridMismatch {
                expected: reference.n(),
                found: moving.n(),
            });
        }

        let center = moving.grid_center();
        let pivot = moving.center_of_mass().unwrap_or(center);
        let reference_abs = reference.data().mapv(f64::abs);
        let moving_abs = moving.data().mapv(f64::abs);

        let candidates = match coarse_search(
            &reference_abs,
            &moving_abs,
            &pivot,
            &center,
            self.config.coarse_directions,
            self.config.top_candidates,
            abort,
        ) {
            RunOutcome::Completed(candidates) => candidates,
            RunOutcome::Aborted => return Ok(RunOutcome::Aborted),
        };

        let optimizer = self.optimizer();
        let mut best: Option<(f64, Params)> = None;
        for candidate in &candidates {
            if abort.is_raised() {
                return Ok(RunOutcome::Aborted);
            }
            let minimum = optimizer.minimize(
                |params| {
                    let placed = place(&moving_abs, params, &pivot, &center, Interpolation::Linear);
                    inverse_score(overlap_score(&reference_abs, &placed))
                },
                candidate.params,
            );
            let placed = place(&moving_abs, &minimum.x, &pivot, &center, Interpolation::Cubic);
            let score = overlap_score(&reference_abs, &placed);
            debug!(
                coarse = candidate.score,
                refined = score,
                evaluations = minimum.evaluations,
                "Refined alignment candidate."
            );
            if best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, minimum.x));
            }
        }

        let Some((score, params)) = best else {
            return Err(EngineError::Internal(
                "coarse alignment search produced no candidates".to_string(),
            ));
        };

        let mut aligned = moving.clone();
        *aligned.data_mut() = place(moving.data(), &params, &pivot, &center, Interpolation::Cubic);
        aligned.renormalize_to(moving.total());
        let parameters: [f64; 6] = params.into();
        Ok(RunOutcome::Completed(AlignmentResult {
            map: aligned,
            score,
            transform: RigidTransform::from_parameters(&parameters),
        }))
    }
}

fn inverse_score(score: f64) -> f64 {
    if score > 0.0 { 1.0 / score } else { f64::MAX }
}

/// Moves the center of mass onto the grid center (cubic interpolation, periodic) and
/// restores the electron count. Returns the map with the applied shift in voxels.
pub fn center_map(map: &DensityMap) -> (DensityMap, Vector3<f64>) {
    let Some(com) = map.center_of_mass() else {
        return (map.clone(), Vector3::zeros());
    };
    let shift = map.grid_center() - com;
    (shift_map(map, &shift), shift)
}

/// Translates a map by `shift` voxels with cubic interpolation, preserving its electron
/// count.
pub fn shift_map(map: &DensityMap, shift: &Vector3<f64>) -> DensityMap {
    let mut shifted = map.clone();
    *shifted.data_mut() = resample::shift(map.data(), shift, Interpolation::Cubic);
    shifted.renormalize_to(map.total());
    shifted
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn blob(n: usize) -> DensityMap {
        let c = n as f64 / 2.0;
        let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let (x, y, z) = (i as f64 - c, j as f64 - c, k as f64 - c);
            (-(x * x / 9.0 + y * y / 2.0 + z * z / 1.5) / 2.0).exp()
                + 0.5 * (-((x - 3.0).powi(2) + (y - 1.0).powi(2) + z * z) / 2.0).exp()
        });
        DensityMap::new(data, n as f64 * 2.0).unwrap()
    }

    fn quick_config() -> AlignmentConfig {
        AlignmentConfig {
            coarse_directions: 6,
            top_candidates: 2,
            max_iterations: 20,
            max_evaluations: 60,
            ..AlignmentConfig::default()
        }
    }

    #[test]
    fn spherical_map_aligns_onto_itself_with_unit_score() {
        let n = 16;
        let c = n as f64 / 2.0;
        let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let r2 = (i as f64 - c).powi(2) + (j as f64 - c).powi(2) + (k as f64 - c).powi(2);
            (-r2 / 8.0).exp()
        });
        let map = DensityMap::new(data, 32.0).unwrap();
        let aligner = Aligner::new(quick_config());
        let result = aligner
            .align(&map, &map, &AbortFlag::new())
            .unwrap()
            .completed()
            .unwrap();
        assert!(result.score > 0.99, "score {}", result.score);
        assert!((result.map.total() - map.total()).abs() < 1e-8 * map.total());
    }

    #[test]
    fn sign_flipped_copy_scores_on_absolute_density() {
        let reference = blob(16);
        let mut moving = reference.clone();
        moving.data_mut().mapv_inplace(|v| -v);
        let result = Aligner::new(quick_config())
            .align(&reference, &moving, &AbortFlag::new())
            .unwrap()
            .completed()
            .unwrap();
        assert!(result.score > 0.99, "score {}", result.score);
        assert!(result.map.total() < 0.0);
        assert!((result.map.total() - moving.total()).abs() < 1e-8 * moving.total().abs());
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let aligner = Aligner::default();
        let result = aligner.align(&blob(8), &blob(10), &AbortFlag::new());
        assert!(matches!(
            result,
            Err(EngineError::GridMismatch {
                expected: 8,
                found: 10
            })
        ));
    }

    #[test]
    fn raised_abort_flag_stops_alignment() {
        let abort = AbortFlag::new();
        abort.raise();
        let map = blob(8);
        let outcome = Aligner::default().align(&map, &map, &abort).unwrap();
        assert!(outcome.is_aborted());
    }

    #[test]
    fn centering_moves_mass_to_grid_center() {
        let map = blob(32);
        let rolled = DensityMap::new(resample::roll(map.data(), [3, 0, -2]), map.side()).unwrap();
        let (centered, shift) = center_map(&rolled);
        let com = centered.center_of_mass().unwrap();
        assert!((com - centered.grid_center()).norm() < 0.05);
        assert!(shift.x < -2.0 && shift.z > 1.0);
        assert!((centered.total() - rolled.total()).abs() < 1e-8 * rolled.total());
    }
}
