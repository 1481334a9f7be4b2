use super::{default_prefix, read_maps};
use crate::cli::AverageArgs;
use crate::config::PartialConfig;
use crate::error::Result;
use crate::ui::{CliProgressHandler, UiEvent};
use denss::engine::cancel::{AbortFlag, RunOutcome};
use denss::engine::pool::TaskPool;
use denss::engine::progress::ProgressReporter;
use denss::workflows::average;
use denss::workflows::output::OutputSpec;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn run(args: AverageArgs, ui_sender: mpsc::Sender<UiEvent>, abort: AbortFlag) -> Result<()> {
    let partial = PartialConfig::load(args.config.as_deref())?;
    let config = partial.averaging_config(args.enantiomer_preselect)?;

    let maps = read_maps(&args.maps)?;
    info!("Loaded {} map(s) for averaging.", maps.len());

    let prefix = args
        .output
        .prefix
        .clone()
        .or_else(|| args.maps.first().map(|path| default_prefix(path, "denss")))
        .unwrap_or_else(|| "average".to_string());
    let output = OutputSpec::new(&args.output.output_dir, prefix)
        .with_xplor(partial.xplor(args.output.xplor));

    let progress_handler = CliProgressHandler::new(ui_sender);
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let pool = TaskPool::new(abort);

    println!("Averaging {} map(s)...", maps.len());
    let outcome = tokio::task::block_in_place(|| {
        average::run(&maps, &config, &output, &pool, &reporter)
    })?;

    match outcome {
        RunOutcome::Completed(result) => {
            println!(
                "✓ Averaged {} of {} maps (mean score {:.4} ± {:.4})",
                result.accepted_count(),
                result.scores.len(),
                result.mean_score,
                result.std_score
            );
            println!(
                "  Resolution (FSC = {}): {:.1} A",
                config.fsc_threshold, result.resolution
            );
            println!("  Average written to: {}", output.path("_average.mrc").display());
        }
        RunOutcome::Aborted => {
            warn!("Averaging aborted before completion.");
            println!("Aborted.");
        }
    }
    Ok(())
}
