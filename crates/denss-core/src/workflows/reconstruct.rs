use super::average;
use super::output::{OutputSpec, file_subscriber};
use crate::core::grid::RealSpaceGrid;
use crate::core::io::mrc::Mrc;
use crate::core::io::text::write_columns_to_path;
use crate::core::io::traits::MapFile;
use crate::core::models::curve::ScatteringCurve;
use crate::core::models::density::DensityMap;
use crate::engine::averaging::EnsembleResult;
use crate::engine::cancel::{AbortFlag, RunOutcome, completed_or_return};
use crate::engine::config::{AveragingConfig, ReconstructionConfig};
use crate::engine::error::EngineError;
use crate::engine::pool::{TaskHandle, TaskPool};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::refinement::Refinement;
use crate::engine::refinement::state::RefinementOutput;
use std::sync::Arc;
use tracing::{error, info, instrument};
use tracing_subscriber::filter::LevelFilter;

const FIT_HEADER: &str = "q(data) I(data) error(data) q(density) I(density)";
const STATS_HEADER: &str = "Chi2 Rg SupportVolume";

/// What a batch does after its independent runs finish.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub runs: usize,
    /// Average the runs with these settings; needs at least two runs.
    pub averaging: Option<AveragingConfig>,
    /// Rerun the reconstruction starting from the average.
    pub refine: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            runs: 1,
            averaging: None,
            refine: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub runs: Vec<RefinementOutput>,
    pub ensemble: Option<EnsembleResult>,
    pub refined: Option<RefinementOutput>,
}

/// Runs one reconstruction and writes its maps, fit, statistics and log.
///
/// Nothing but the log and the latest snapshot is written when the run is aborted.
#[instrument(skip_all, name = "reconstruction_workflow", fields(prefix = output.prefix()))]
pub fn run(
    curve: &ScatteringCurve,
    config: &ReconstructionConfig,
    output: &OutputSpec,
    abort: &AbortFlag,
    reporter: &ProgressReporter,
) -> Result<RunOutcome<RefinementOutput>, EngineError> {
    run_logged(curve, config, output, None, 0, abort, reporter)
}

/// Reruns the reconstruction warm-started from `start`, a map in e⁻/Å³ such as an
/// ensemble average.
#[instrument(skip_all, name = "refinement_workflow", fields(prefix = output.prefix()))]
pub fn refine(
    curve: &ScatteringCurve,
    config: &ReconstructionConfig,
    start: &DensityMap,
    output: &OutputSpec,
    abort: &AbortFlag,
    reporter: &ProgressReporter,
) -> Result<RunOutcome<RefinementOutput>, EngineError> {
    let grid = RealSpaceGrid::from_voxel_size(config.box_side(), config.voxel_size)?;
    let warm = warm_start(start, &grid)?;
    info!(
        start_grid = start.n(),
        run_grid = grid.n(),
        "Refining from a supplied starting map."
    );
    run_logged(curve, config, output, Some(&warm), 0, abort, reporter)
}

/// Embeds `map` centered in the run grid and converts it to electrons per voxel.
fn warm_start(map: &DensityMap, grid: &RealSpaceGrid) -> Result<DensityMap, EngineError> {
    let dv = grid.voxel_volume();
    let embedded = map.embed_centered(grid.n());
    Ok(DensityMap::new(embedded.into_data().mapv(|v| v * dv), grid.side())?)
}

fn run_logged(
    curve: &ScatteringCurve,
    config: &ReconstructionConfig,
    output: &OutputSpec,
    warm: Option<&DensityMap>,
    run_index: usize,
    abort: &AbortFlag,
    reporter: &ProgressReporter,
) -> Result<RunOutcome<RefinementOutput>, EngineError> {
    output.ensure_directory()?;
    let subscriber = file_subscriber(&output.path(".log"), LevelFilter::INFO)?;
    tracing::subscriber::with_default(subscriber, || {
        let result = run_unlogged(curve, config, output, warm, run_index, abort, reporter);
        if let Err(err) = &result {
            error!(error = %err, "Reconstruction failed.");
        }
        result
    })
}

fn run_unlogged(
    curve: &ScatteringCurve,
    config: &ReconstructionConfig,
    output: &OutputSpec,
    warm: Option<&DensityMap>,
    run_index: usize,
    abort: &AbortFlag,
    reporter: &ProgressReporter,
) -> Result<RunOutcome<RefinementOutput>, EngineError> {
    let refinement = Refinement::new(curve, config)?.with_run_index(run_index);
    let snapshot_path = output.path("_current.mrc");
    let mut snapshots = |_step: usize, map: &DensityMap| -> Result<(), EngineError> {
        Mrc::write_to_path(map, &snapshot_path)?;
        Ok(())
    };

    let result = completed_or_return!(refinement.run(warm, abort, reporter, &mut snapshots)?);
    write_outputs(output, &result)?;
    info!(
        steps = result.steps,
        chi2 = result.final_chi2(),
        rg = result.final_rg(),
        support_volume = result.final_support_volume(),
        directory = %output.directory().display(),
        "Wrote reconstruction outputs."
    );
    Ok(RunOutcome::Completed(result))
}

/// Writes `{prefix}.mrc`, `{prefix}_support.mrc`, the fit and the per-step statistics.
pub fn write_outputs(output: &OutputSpec, result: &RefinementOutput) -> Result<(), EngineError> {
    output.write_map(&result.map, "")?;
    let support = result.support.to_map(result.map.side())?;
    output.write_map(&support, "_support")?;

    let fit = &result.fit;
    let model: Vec<f64> = fit
        .i_model
        .iter()
        .map(|&v| if v.is_finite() { v } else { 0.0 })
        .collect();
    write_columns_to_path(
        output.path("_map.fit"),
        FIT_HEADER,
        &[&fit.q_data, &fit.i_data, &fit.sigma_data, &fit.q_model, &model],
    )?;

    let trace = &result.trace;
    write_columns_to_path(
        output.path("_stats_by_step.dat"),
        STATS_HEADER,
        &[trace.chi2(), trace.rg(), trace.support_volume()],
    )?;
    Ok(())
}

/// Runs `options.runs` independent reconstructions on the pool, then optionally averages
/// and refines them.
///
/// Run `i` writes under `{prefix}_{i:02}` (from 1) and, when a seed is configured, uses
/// `seed + i - 1`. The average goes to `{prefix}` and the refinement to `{prefix}_refine`.
#[instrument(skip_all, name = "batch_workflow", fields(runs = options.runs))]
pub fn run_batch(
    curve: &ScatteringCurve,
    config: &ReconstructionConfig,
    options: &BatchOptions,
    output: &OutputSpec,
    pool: &TaskPool,
    reporter: &ProgressReporter,
) -> Result<RunOutcome<BatchResult>, EngineError> {
    let runs = options.runs.max(1);
    let curve = Arc::new(curve.clone());

    reporter.report(Progress::PhaseStart {
        name: "Reconstruction",
    });
    reporter.report(Progress::TaskStart {
        total_steps: runs as u64,
    });
    info!(runs, "Starting independent reconstructions.");
    let handles: Vec<TaskHandle<RefinementOutput>> = (0..runs)
        .map(|index| {
            let curve = Arc::clone(&curve);
            let mut run_config = config.clone();
            run_config.seed = config.seed.map(|seed| seed + index as u64);
            let run_output = output.child(&format!("_{:02}", index + 1));
            let abort = pool.abort_flag().clone();
            let reporter = reporter.clone();
            pool.submit(format!("reconstruction run {}", index + 1), move || {
                if abort.is_raised() {
                    return Ok(RunOutcome::Aborted);
                }
                reporter.report(Progress::StatusUpdate {
                    text: format!("Starting run {}", index + 1),
                });
                run_logged(&curve, &run_config, &run_output, None, index, &abort, &reporter)
            })
        })
        .collect();

    let mut outputs = Vec::with_capacity(runs);
    let mut aborted = false;
    let mut failure = None;
    for result in TaskPool::join_all(handles) {
        reporter.report(Progress::TaskIncrement);
        match result {
            Ok(RunOutcome::Completed(run)) => outputs.push(run),
            Ok(RunOutcome::Aborted) => aborted = true,
            Err(err) => {
                failure.get_or_insert(err);
            }
        }
    }
    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);
    if let Some(err) = failure {
        return Err(err);
    }
    if aborted {
        info!("Aborted.");
        return Ok(RunOutcome::Aborted);
    }

    let mut ensemble = None;
    let mut refined = None;
    if let Some(averaging) = &options.averaging {
        if outputs.len() < 2 {
            info!("Skipping averaging: at least two runs are needed.");
        } else {
            let maps: Vec<DensityMap> = outputs.iter().map(|run| run.map.clone()).collect();
            let result = completed_or_return!(average::run(&maps, averaging, output, pool, reporter)?);
            if options.refine {
                let refine_output = output.child("_refine");
                reporter.report(Progress::PhaseStart { name: "Refinement" });
                let run = refine(
                    &curve,
                    config,
                    &result.average,
                    &refine_output,
                    pool.abort_flag(),
                    reporter,
                )?;
                reporter.report(Progress::PhaseFinish);
                refined = Some(completed_or_return!(run));
            }
            ensemble = Some(result);
        }
    }

    Ok(RunOutcome::Completed(BatchResult {
        runs: outputs,
        ensemble,
        refined,
    }))
}
