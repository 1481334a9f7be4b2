use super::output::OutputSpec;
use crate::core::io::MapFileError;
use crate::core::io::text::write_columns_to_path;
use crate::core::models::density::DensityMap;
use crate::engine::averaging::{EnsembleAverager, EnsembleResult};
use crate::engine::cancel::{RunOutcome, completed_or_return};
use crate::engine::config::AveragingConfig;
use crate::engine::error::EngineError;
use crate::engine::pool::TaskPool;
use crate::engine::progress::ProgressReporter;
use std::fmt::Write as _;
use tracing::{info, instrument};

/// Averages a population of maps and writes `{prefix}_average.mrc`, `{prefix}_fsc.dat`
/// and `{prefix}_summary.txt`.
#[instrument(skip_all, name = "averaging_workflow", fields(maps = maps.len()))]
pub fn run(
    maps: &[DensityMap],
    config: &AveragingConfig,
    output: &OutputSpec,
    pool: &TaskPool,
    reporter: &ProgressReporter,
) -> Result<RunOutcome<EnsembleResult>, EngineError> {
    let averager = EnsembleAverager::new(config.clone(), pool.clone(), reporter.clone())?;
    let result = completed_or_return!(averager.average(maps)?);

    output.ensure_directory()?;
    output.write_map(&result.average, "_average")?;
    let header = format!(
        "q FSC (resolution {:.2} A at FSC = {})",
        result.resolution, config.fsc_threshold
    );
    write_columns_to_path(
        output.path("_fsc.dat"),
        &header,
        &[result.fsc.q(), result.fsc.correlation()],
    )?;
    std::fs::write(output.path("_summary.txt"), summary(&result, config))
        .map_err(MapFileError::from)?;

    info!(
        accepted = result.accepted_count(),
        total = result.scores.len(),
        resolution = result.resolution,
        "Wrote averaging outputs."
    );
    Ok(RunOutcome::Completed(result))
}

/// Plain-text report of the averaging statistics.
pub fn summary(result: &EnsembleResult, config: &AveragingConfig) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Mean score: {:.4}", result.mean_score);
    let _ = writeln!(text, "Std score: {:.4}", result.std_score);
    let _ = writeln!(
        text,
        "Rejection threshold: {:.4} (mean - {} std)",
        result.threshold, config.outlier_sigma
    );
    let _ = writeln!(text, "Input maps: {}", result.scores.len());
    let _ = writeln!(text, "Accepted maps: {}", result.accepted_count());
    let _ = writeln!(
        text,
        "Reference vs average correlation: {:.4}",
        result.reference_correlation
    );
    let _ = writeln!(
        text,
        "Resolution (FSC = {}): {:.2} A",
        config.fsc_threshold, result.resolution
    );
    for (index, (score, accepted)) in result.scores.iter().zip(&result.accepted).enumerate() {
        let status = if *accepted { "accepted" } else { "rejected" };
        let _ = writeln!(text, "Model {:>3}: score {:.4} {}", index + 1, score, status);
    }
    text
}
