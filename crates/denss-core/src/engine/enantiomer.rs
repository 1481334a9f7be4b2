use super::alignment::principal::align_to_principal_axes;
use super::alignment::Aligner;
use super::cancel::{AbortFlag, RunOutcome};
use super::error::EngineError;
use crate::core::models::density::DensityMap;
use crate::core::models::transform::RigidTransform;
use crate::core::utils::resample::Interpolation;
use nalgebra::{Matrix3, Vector3};
use tracing::debug;

/// The principal-axis frame of a reference map: the rotation and centering shift that
/// carried it onto the coordinate axes.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceFrame {
    pub rotation: Matrix3<f64>,
    pub shift: Vector3<f64>,
}

impl ReferenceFrame {
    pub fn of(reference: &DensityMap) -> Self {
        let principal = align_to_principal_axes(reference);
        Self {
            rotation: principal.rotation,
            shift: principal.shift,
        }
    }

    /// Takes a map sitting on the principal axes back to where the reference sits. The
    /// inverse rotation pivots on the map's own center of mass and lands it on the
    /// reference's center of mass; the electron count is kept.
    pub fn restore(&self, map: &DensityMap) -> DensityMap {
        let center = map.grid_center();
        let pivot = map.center_of_mass().unwrap_or(center);
        let target = center - self.shift;
        let inverse = RigidTransform::new(self.rotation.transpose(), Vector3::zeros());
        let mut restored = map.clone();
        *restored.data_mut() = inverse.resample(map.data(), &pivot, &target, Interpolation::Cubic);
        restored.renormalize_to(map.total());
        restored
    }
}

/// The two mirror images considered for a map: the map itself and its x-flip.
pub fn generate_enantiomers(map: &DensityMap) -> [DensityMap; 2] {
    [map.clone(), map.flipped_x()]
}

#[derive(Debug, Clone)]
pub struct EnantiomerChoice {
    /// The winning enantiomer aligned onto the reference.
    pub map: DensityMap,
    pub score: f64,
    /// `true` when the mirror image won.
    pub flipped: bool,
}

/// Aligns both handednesses of `map` onto `reference` and keeps the better one.
///
/// `frame` must be [`ReferenceFrame::of`] the same reference; it is passed in so a
/// population resolved against one reference computes it once.
pub fn select_enantiomer(
    aligner: &Aligner,
    reference: &DensityMap,
    frame: &ReferenceFrame,
    map: &DensityMap,
    abort: &AbortFlag,
) -> Result<RunOutcome<EnantiomerChoice>, EngineError> {
    let on_axes = align_to_principal_axes(map).map;
    let mut best: Option<EnantiomerChoice> = None;

    for (index, enantiomer) in generate_enantiomers(&on_axes).iter().enumerate() {
        if abort.is_raised() {
            return Ok(RunOutcome::Aborted);
        }
        let candidate = frame.restore(enantiomer);
        let aligned = match aligner.align(reference, &candidate, abort)? {
            RunOutcome::Completed(result) => result,
            RunOutcome::Aborted => return Ok(RunOutcome::Aborted),
        };
        debug!(flipped = index == 1, score = aligned.score, "Scored enantiomer.");
        if best.as_ref().is_none_or(|b| aligned.score > b.score) {
            best = Some(EnantiomerChoice {
                map: aligned.map,
                score: aligned.score,
                flipped: index == 1,
            });
        }
    }

    best.map(RunOutcome::Completed)
        .ok_or_else(|| EngineError::Internal("no enantiomer was scored".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utils::resample;
    use crate::engine::config::AlignmentConfig;
    use ndarray::Array3;

    fn chiral(n: usize) -> DensityMap {
        let c = n as f64 / 2.0;
        let lobe = |x: f64, y: f64, z: f64, cx: f64, cy: f64, cz: f64, w: f64| {
            w * (-((x - cx).powi(2) + (y - cy).powi(2) + (z - cz).powi(2)) / 2.0).exp()
        };
        let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let (x, y, z) = (i as f64 - c, j as f64 - c, k as f64 - c);
            lobe(x, y, z, 0.0, 0.0, 0.0, 1.0)
                + lobe(x, y, z, 4.0, 0.0, 0.0, 0.8)
                + lobe(x, y, z, 0.0, 3.0, 0.0, 0.6)
                + lobe(x, y, z, 0.0, 0.0, 2.0, 0.4)
        });
        DensityMap::new(data, n as f64 * 3.0).unwrap()
    }

    #[test]
    fn enantiomers_are_the_map_and_its_mirror() {
        let map = chiral(8);
        let enantiomers = generate_enantiomers(&map);
        assert_eq!(enantiomers.len(), 2);
        assert_eq!(enantiomers[0], map);
        assert_eq!(enantiomers[1].data()[[0, 2, 3]], map.data()[[7, 2, 3]]);
    }

    #[test]
    fn selection_returns_one_of_the_two_with_its_score() {
        let map = chiral(16);
        let aligner = Aligner::new(AlignmentConfig {
            coarse_directions: 4,
            top_candidates: 1,
            max_iterations: 5,
            max_evaluations: 20,
            ..AlignmentConfig::default()
        });
        let frame = ReferenceFrame::of(&map);
        let choice = select_enantiomer(&aligner, &map, &frame, &map, &AbortFlag::new())
            .unwrap()
            .completed()
            .unwrap();
        assert!(choice.score > 0.0 && choice.score <= 1.0 + 1e-9);
        assert!((choice.map.total() - map.total()).abs() < 1e-6 * map.total());
    }

    #[test]
    fn restore_lands_on_the_reference_center_of_mass() {
        let data = resample::roll(chiral(20).data(), [1, -1, 1]);
        let reference = DensityMap::new(data, 60.0).unwrap();
        let frame = ReferenceFrame::of(&reference);
        let on_axes = align_to_principal_axes(&reference).map;
        let restored = frame.restore(&on_axes);

        let expected = reference.center_of_mass().unwrap();
        let com = restored.center_of_mass().unwrap();
        assert!((com - expected).norm() < 0.1, "com {com:?}, expected {expected:?}");
        assert!((restored.total() - on_axes.total()).abs() < 1e-9 * on_axes.total());
    }

    #[test]
    fn aborted_selection_reports_aborted() {
        let map = chiral(8);
        let abort = AbortFlag::new();
        abort.raise();
        let frame = ReferenceFrame::of(&map);
        let outcome = select_enantiomer(&Aligner::default(), &map, &frame, &map, &abort).unwrap();
        assert!(outcome.is_aborted());
    }
}
