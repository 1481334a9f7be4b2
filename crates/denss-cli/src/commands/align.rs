use super::{default_prefix, read_map, read_maps};
use crate::cli::AlignArgs;
use crate::config::PartialConfig;
use crate::error::Result;
use crate::ui::{CliProgressHandler, UiEvent};
use denss::engine::cancel::{AbortFlag, RunOutcome};
use denss::engine::pool::TaskPool;
use denss::engine::progress::ProgressReporter;
use denss::workflows::align;
use denss::workflows::output::OutputSpec;
use tokio::sync::mpsc;
use tracing::warn;

pub async fn run(args: AlignArgs, ui_sender: mpsc::Sender<UiEvent>, abort: AbortFlag) -> Result<()> {
    let partial = PartialConfig::load(args.config.as_deref())?;
    let config = partial.averaging_config(false)?.alignment;

    let reference = read_map(&args.reference)?;
    let maps = read_maps(&args.maps)?;

    let prefix = args
        .output
        .prefix
        .clone()
        .unwrap_or_else(|| default_prefix(&args.reference, "reference"));
    let output = OutputSpec::new(&args.output.output_dir, prefix)
        .with_xplor(partial.xplor(args.output.xplor));

    let progress_handler = CliProgressHandler::new(ui_sender);
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let pool = TaskPool::new(abort);

    println!("Aligning {} map(s) to {}...", maps.len(), args.reference.display());
    let outcome = tokio::task::block_in_place(|| {
        align::run(
            &reference,
            &maps,
            &config,
            !args.no_enantiomer,
            &output,
            &pool,
            &reporter,
        )
    })?;

    match outcome {
        RunOutcome::Completed(aligned) => {
            for (index, (path, score)) in args.maps.iter().zip(&aligned.scores).enumerate() {
                println!(
                    "✓ {} (score {:.4}) written to: {}",
                    path.display(),
                    score,
                    output.path(&format!("_aligned_{}.mrc", index + 1)).display()
                );
            }
        }
        RunOutcome::Aborted => {
            warn!("Alignment aborted before completion.");
            println!("Aborted.");
        }
    }
    Ok(())
}
