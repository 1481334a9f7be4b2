use super::output::OutputSpec;
use crate::core::models::density::DensityMap;
use crate::engine::averaging::EnsembleAverager;
use crate::engine::cancel::{RunOutcome, completed_or_return};
use crate::engine::config::{AlignmentConfig, AveragingConfig};
use crate::engine::error::EngineError;
use crate::engine::pool::TaskPool;
use crate::engine::progress::{Progress, ProgressReporter};
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct AlignedMaps {
    pub maps: Vec<DensityMap>,
    pub scores: Vec<f64>,
}

/// Aligns every map onto `reference` and writes `{prefix}_aligned_{i}.mrc` (from 1).
///
/// With `select_enantiomers` each map is first replaced by whichever of its two
/// mirror images fits the reference better.
#[instrument(skip_all, name = "alignment_workflow", fields(maps = maps.len()))]
pub fn run(
    reference: &DensityMap,
    maps: &[DensityMap],
    config: &AlignmentConfig,
    select_enantiomers: bool,
    output: &OutputSpec,
    pool: &TaskPool,
    reporter: &ProgressReporter,
) -> Result<RunOutcome<AlignedMaps>, EngineError> {
    let averager = EnsembleAverager::new(
        AveragingConfig {
            alignment: config.clone(),
            ..AveragingConfig::default()
        },
        pool.clone(),
        reporter.clone(),
    )?;

    let mut population = maps.to_vec();
    if select_enantiomers {
        reporter.report(Progress::PhaseStart {
            name: "Enantiomer Selection",
        });
        let choices = completed_or_return!(averager.resolve_enantiomers(reference, &population)?);
        let flipped = choices.iter().filter(|c| c.flipped).count();
        info!(flipped, total = choices.len(), "Selected enantiomers against the reference.");
        population = choices.into_iter().map(|c| c.map).collect();
        reporter.report(Progress::PhaseFinish);
    }

    reporter.report(Progress::PhaseStart {
        name: "Alignment",
    });
    let results = completed_or_return!(averager.align_to_reference(reference, &population)?);
    reporter.report(Progress::PhaseFinish);

    output.ensure_directory()?;
    let mut aligned = AlignedMaps {
        maps: Vec::with_capacity(results.len()),
        scores: Vec::with_capacity(results.len()),
    };
    for (index, result) in results.into_iter().enumerate() {
        output.write_map(&result.map, &format!("_aligned_{}", index + 1))?;
        info!(model = index + 1, score = result.score, "Aligned map to the reference.");
        aligned.maps.push(result.map);
        aligned.scores.push(result.score);
    }
    Ok(RunOutcome::Completed(aligned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cancel::AbortFlag;
    use ndarray::Array3;

    fn offset_blob(n: usize, offset: f64) -> DensityMap {
        let c = n as f64 / 2.0;
        let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let (x, y, z) = (i as f64 - c - offset, j as f64 - c, k as f64 - c);
            (-(x * x + y * y + z * z) / 4.0).exp()
        });
        DensityMap::new(data, 40.0).unwrap()
    }

    fn quick_config() -> AlignmentConfig {
        AlignmentConfig {
            coarse_directions: 2,
            top_candidates: 1,
            max_iterations: 4,
            max_evaluations: 16,
            ..AlignmentConfig::default()
        }
    }

    #[test]
    fn maps_are_moved_onto_the_reference_and_written() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputSpec::new(dir.path(), "fit");
        let reference = offset_blob(12, 2.0);
        let maps = vec![offset_blob(12, -1.0), offset_blob(12, 0.0)];
        let pool = TaskPool::new(AbortFlag::new());
        let aligned = run(&reference, &maps, &quick_config(), false, &output, &pool, &ProgressReporter::new())
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(aligned.maps.len(), 2);
        assert!(aligned.scores.iter().all(|&s| s > 0.95), "{:?}", aligned.scores);
        assert!(dir.path().join("fit_aligned_1.mrc").exists());
        assert!(dir.path().join("fit_aligned_2.mrc").exists());
    }

    #[test]
    fn grid_mismatch_with_the_reference_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputSpec::new(dir.path(), "fit");
        let pool = TaskPool::new(AbortFlag::new());
        let result = run(
            &offset_blob(12, 0.0),
            &[offset_blob(10, 0.0)],
            &quick_config(),
            true,
            &output,
            &pool,
            &ProgressReporter::new(),
        );
        assert!(matches!(result, Err(EngineError::GridMismatch { .. })));
    }
}
