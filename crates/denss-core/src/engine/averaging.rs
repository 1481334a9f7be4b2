use super::alignment::score::overlap_score;
use super::alignment::{AlignmentResult, Aligner, center_map, shift_map};
use super::cancel::{RunOutcome, completed_or_return};
use super::config::AveragingConfig;
use super::enantiomer::{EnantiomerChoice, ReferenceFrame, select_enantiomer};
use super::error::EngineError;
use super::fsc::{FscCalculator, FscCurve};
use super::pool::{TaskHandle, TaskPool};
use super::progress::{Progress, ProgressReporter};
use crate::core::models::density::DensityMap;
use crate::core::utils::stats;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Reference map produced by pairwise reduction.
#[derive(Debug, Clone)]
pub struct BinaryAverage {
    pub map: DensityMap,
    /// Number of maps that entered the reduction (the largest power of two available).
    pub inputs: usize,
    pub levels: usize,
}

#[derive(Debug, Clone)]
pub struct EnsembleResult {
    pub average: DensityMap,
    pub reference: DensityMap,
    /// Every input map after enantiomer selection and alignment onto the reference.
    pub aligned: Vec<DensityMap>,
    pub scores: Vec<f64>,
    pub accepted: Vec<bool>,
    pub mean_score: f64,
    pub std_score: f64,
    pub threshold: f64,
    pub fsc: FscCurve,
    pub resolution: f64,
    /// Overlap score between the reference and the final average.
    pub reference_correlation: f64,
}

impl EnsembleResult {
    pub fn accepted_count(&self) -> usize {
        self.accepted.iter().filter(|&&a| a).count()
    }
}

/// Combines independent reconstructions into one map.
#[derive(Debug, Clone)]
pub struct EnsembleAverager {
    config: AveragingConfig,
    aligner: Aligner,
    pool: TaskPool,
    reporter: ProgressReporter,
}

impl EnsembleAverager {
    pub fn new(
        config: AveragingConfig,
        pool: TaskPool,
        reporter: ProgressReporter,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            aligner: Aligner::new(config.alignment.clone()),
            config,
            pool,
            reporter,
        })
    }

    pub fn aligner(&self) -> &Aligner {
        &self.aligner
    }

    /// Averages a population: builds a reference, resolves each map's handedness against
    /// it, rejects low-scoring maps and estimates the resolution by FSC.
    #[instrument(skip_all, name = "ensemble_average", fields(maps = maps.len()))]
    pub fn average(&self, maps: &[DensityMap]) -> Result<RunOutcome<EnsembleResult>, EngineError> {
        check_grids(maps)?;

        let mut population = maps.to_vec();
        if self.config.enantiomer_preselect && population.len() > 1 {
            self.reporter.report(Progress::PhaseStart {
                name: "Enantiomer Preselection",
            });
            info!("Selecting enantiomers against the first map.");
            let first = population[0].clone();
            let choices = completed_or_return!(self.resolve_enantiomers(&first, &population)?);
            population = choices.into_iter().map(|c| c.map).collect();
            self.reporter.report(Progress::PhaseFinish);
        }

        self.reporter.report(Progress::PhaseStart {
            name: "Reference Generation",
        });
        let reference = completed_or_return!(self.binary_average(&population)?);
        info!(
            inputs = reference.inputs,
            levels = reference.levels,
            "Reference map generated."
        );
        let reference = reference.map;
        self.reporter.report(Progress::PhaseFinish);

        self.reporter.report(Progress::PhaseStart {
            name: "Enantiomer Selection",
        });
        let choices = completed_or_return!(self.resolve_enantiomers(&reference, &population)?);
        self.reporter.report(Progress::PhaseFinish);

        let scores: Vec<f64> = choices.iter().map(|c| c.score).collect();
        let (mean_score, std_score) = stats::mean_std(&scores);
        let threshold = mean_score - self.config.outlier_sigma * std_score;
        let mut accepted: Vec<bool> = scores.iter().map(|&s| s > threshold).collect();
        if !accepted.iter().any(|&a| a) {
            warn!(
                mean = mean_score,
                std = std_score,
                "No map scored above the rejection threshold; keeping all maps."
            );
            accepted.iter_mut().for_each(|a| *a = true);
        }
        for (index, (score, keep)) in scores.iter().zip(&accepted).enumerate() {
            if !keep {
                info!(model = index + 1, score, threshold, "Rejected outlier map.");
            }
        }

        let aligned: Vec<DensityMap> = choices.into_iter().map(|c| c.map).collect();
        let kept: Vec<&DensityMap> = aligned
            .iter()
            .zip(&accepted)
            .filter_map(|(map, &keep)| keep.then_some(map))
            .collect();
        let average = DensityMap::average(kept.iter().copied()).ok_or(EngineError::EmptyEnsemble(
            "no maps were accepted for averaging",
        ))?;

        self.reporter.report(Progress::PhaseStart {
            name: "Resolution Estimate",
        });
        let calculator = FscCalculator::for_map(&reference)?;
        let curves = kept
            .iter()
            .map(|map| calculator.compute(map, &reference))
            .collect::<Result<Vec<_>, _>>()?;
        let fsc = FscCurve::mean(&curves)
            .ok_or(EngineError::EmptyEnsemble("no FSC curves were computed"))?;
        let resolution = fsc.resolution(self.config.fsc_threshold);
        let reference_correlation = overlap_score(reference.data(), average.data());
        self.reporter.report(Progress::PhaseFinish);

        info!(
            mean_score,
            std_score,
            accepted = kept.len(),
            total = aligned.len(),
            resolution,
            "Ensemble averaging complete."
        );

        Ok(RunOutcome::Completed(EnsembleResult {
            average,
            reference,
            aligned,
            scores,
            accepted,
            mean_score,
            std_score,
            threshold,
            fsc,
            resolution,
            reference_correlation,
        }))
    }

    /// Reduces the first `2^k` maps by repeatedly aligning the second map of each adjacent
    /// pair onto the first and averaging them, then centers the survivor.
    #[instrument(skip_all, name = "binary_average")]
    pub fn binary_average(&self, maps: &[DensityMap]) -> Result<RunOutcome<BinaryAverage>, EngineError> {
        check_grids(maps)?;
        let levels = maps.len().ilog2() as usize;
        let inputs = 1usize << levels;
        let mut current: Vec<DensityMap> = maps[..inputs].to_vec();

        self.reporter.report(Progress::TaskStart {
            total_steps: (inputs - 1) as u64,
        });
        for level in 0..levels {
            debug!(level = level + 1, maps = current.len(), "Averaging pairs.");
            let handles: Vec<TaskHandle<DensityMap>> = current
                .chunks_exact(2)
                .enumerate()
                .map(|(pair, chunk)| {
                    let first = chunk[0].clone();
                    let second = chunk[1].clone();
                    let aligner = self.aligner.clone();
                    let abort = self.pool.abort_flag().clone();
                    self.pool.submit(format!("pair {} of level {}", pair + 1, level + 1), move || {
                        let aligned =
                            completed_or_return!(aligner.align(&first, &second, &abort)?).map;
                        let mut mean = first.clone();
                        *mean.data_mut() = (first.data() + aligned.data()) / 2.0;
                        Ok(RunOutcome::Completed(mean))
                    })
                })
                .collect();
            current = completed_or_return!(self.collect(handles)?);
        }
        self.reporter.report(Progress::TaskFinish);

        let survivor = current
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Internal("pairwise reduction left no map".to_string()))?;
        let (map, _) = center_map(&survivor);
        Ok(RunOutcome::Completed(BinaryAverage {
            map,
            inputs,
            levels,
        }))
    }

    /// Picks the better-scoring handedness of every map against `reference`, one pool
    /// task per map. Results keep the input order.
    #[instrument(skip_all, name = "enantiomer_selection", fields(maps = maps.len()))]
    pub fn resolve_enantiomers(
        &self,
        reference: &DensityMap,
        maps: &[DensityMap],
    ) -> Result<RunOutcome<Vec<EnantiomerChoice>>, EngineError> {
        let reference = Arc::new(reference.clone());
        let frame = Arc::new(ReferenceFrame::of(&reference));
        self.reporter.report(Progress::TaskStart {
            total_steps: maps.len() as u64,
        });
        let handles: Vec<TaskHandle<EnantiomerChoice>> = maps
            .iter()
            .enumerate()
            .map(|(index, map)| {
                let reference = Arc::clone(&reference);
                let frame = Arc::clone(&frame);
                let map = map.clone();
                let aligner = self.aligner.clone();
                let abort = self.pool.abort_flag().clone();
                let reporter = self.reporter.clone();
                self.pool.submit(format!("enantiomer selection for model {}", index + 1), move || {
                    if abort.is_raised() {
                        return Ok(RunOutcome::Aborted);
                    }
                    let choice = select_enantiomer(&aligner, &reference, &frame, &map, &abort)?;
                    if let RunOutcome::Completed(choice) = &choice {
                        reporter.report(Progress::Message(format!(
                            "Best enantiomer for model {} has score {:.3}",
                            index + 1,
                            choice.score
                        )));
                    }
                    Ok(choice)
                })
            })
            .collect();
        let choices = self.collect(handles)?;
        self.reporter.report(Progress::TaskFinish);
        Ok(choices)
    }

    /// Aligns every map onto `reference`. Each map is first centered and then moved so
    /// its center of mass sits where the reference's does; one pool task per map.
    #[instrument(skip_all, name = "align_to_reference", fields(maps = maps.len()))]
    pub fn align_to_reference(
        &self,
        reference: &DensityMap,
        maps: &[DensityMap],
    ) -> Result<RunOutcome<Vec<AlignmentResult>>, EngineError> {
        for map in maps {
            if map.n() != reference.n() {
                return Err(EngineError::GridMismatch {
                    expected: reference.n(),
                    found: map.n(),
                });
            }
        }
        let (_, reference_shift) = center_map(reference);
        let reference = Arc::new(reference.clone());
        self.reporter.report(Progress::TaskStart {
            total_steps: maps.len() as u64,
        });
        let handles: Vec<TaskHandle<AlignmentResult>> = maps
            .iter()
            .enumerate()
            .map(|(index, map)| {
                let reference = Arc::clone(&reference);
                let map = map.clone();
                let aligner = self.aligner.clone();
                let abort = self.pool.abort_flag().clone();
                self.pool.submit(format!("alignment of model {}", index + 1), move || {
                    if abort.is_raised() {
                        return Ok(RunOutcome::Aborted);
                    }
                    let (centered, _) = center_map(&map);
                    let placed = shift_map(&centered, &(-reference_shift));
                    aligner.align(&reference, &placed, &abort)
                })
            })
            .collect();
        let results = self.collect(handles)?;
        self.reporter.report(Progress::TaskFinish);
        Ok(results)
    }

    /// Joins task handles in order. Any failure wins over an abort.
    fn collect<T>(&self, handles: Vec<TaskHandle<T>>) -> Result<RunOutcome<Vec<T>>, EngineError> {
        let mut values = Vec::with_capacity(handles.len());
        let mut aborted = false;
        let mut failure = None;
        for result in TaskPool::join_all(handles) {
            self.reporter.report(Progress::TaskIncrement);
            match result {
                Ok(RunOutcome::Completed(value)) => values.push(value),
                Ok(RunOutcome::Aborted) => aborted = true,
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }
        if aborted {
            return Ok(RunOutcome::Aborted);
        }
        Ok(RunOutcome::Completed(values))
    }
}

fn check_grids(maps: &[DensityMap]) -> Result<(), EngineError> {
    let first = maps
        .first()
        .ok_or(EngineError::EmptyEnsemble("at least one map is required"))?;
    for map in &maps[1..] {
        if map.n() != first.n() {
            return Err(EngineError::GridMismatch {
                expected: first.n(),
                found: map.n(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cancel::AbortFlag;
    use crate::engine::config::AlignmentConfig;
    use ndarray::Array3;

    fn quick_averager(abort: AbortFlag) -> EnsembleAverager {
        let config = AveragingConfig {
            alignment: AlignmentConfig {
                coarse_directions: 2,
                top_candidates: 1,
                max_iterations: 2,
                max_evaluations: 8,
                ..AlignmentConfig::default()
            },
            ..AveragingConfig::default()
        };
        EnsembleAverager::new(config, TaskPool::new(abort), ProgressReporter::new()).unwrap()
    }

    fn sphere(n: usize, width: f64) -> DensityMap {
        let c = n as f64 / 2.0;
        let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let r2 = (i as f64 - c).powi(2) + (j as f64 - c).powi(2) + (k as f64 - c).powi(2);
            (-r2 / (2.0 * width * width)).exp()
        });
        DensityMap::new(data, 30.0).unwrap()
    }

    #[test]
    fn binary_average_of_four_maps_takes_two_levels() {
        let maps: Vec<_> = (0..5).map(|i| sphere(10, 1.5 + 0.1 * i as f64)).collect();
        let result = quick_averager(AbortFlag::new())
            .binary_average(&maps)
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(result.inputs, 4);
        assert_eq!(result.levels, 2);
        assert_eq!(result.map.n(), 10);
    }

    #[test]
    fn binary_average_of_one_map_is_the_centered_map() {
        let map = sphere(8, 1.5);
        let result = quick_averager(AbortFlag::new())
            .binary_average(std::slice::from_ref(&map))
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(result.levels, 0);
        assert!((result.map.total() - map.total()).abs() < 1e-8 * map.total());
    }

    #[test]
    fn identical_population_is_fully_accepted() {
        let maps = vec![sphere(10, 1.8); 3];
        let result = quick_averager(AbortFlag::new())
            .average(&maps)
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(result.scores.len(), 3);
        assert_eq!(result.accepted_count(), 3);
        assert!(result.resolution.is_finite() && result.resolution > 0.0);
        assert!(result.reference_correlation > 0.9);
    }

    #[test]
    fn empty_population_is_an_error() {
        let result = quick_averager(AbortFlag::new()).average(&[]);
        assert!(matches!(result, Err(EngineError::EmptyEnsemble(_))));
    }

    #[test]
    fn mixed_grids_are_rejected() {
        let result = quick_averager(AbortFlag::new()).average(&[sphere(8, 1.0), sphere(10, 1.0)]);
        assert!(matches!(result, Err(EngineError::GridMismatch { .. })));
    }

    #[test]
    fn maps_aligned_to_a_reference_keep_their_order() {
        let reference = sphere(10, 1.6);
        let maps = vec![sphere(10, 1.6), sphere(10, 2.0)];
        let results = quick_averager(AbortFlag::new())
            .align_to_reference(&reference, &maps)
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score > 0.99);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn raised_abort_flag_aborts_averaging() {
        let abort = AbortFlag::new();
        abort.raise();
        let maps = vec![sphere(8, 1.5); 2];
        let outcome = quick_averager(abort).average(&maps).unwrap();
        assert!(outcome.is_aborted());
    }
}
