use super::default_prefix;
use crate::cli::ReconstructArgs;
use crate::config::PartialConfig;
use crate::error::{CliError, Result};
use crate::ui::{CliProgressHandler, UiEvent};
use denss::core::io::text::read_profile_from_path;
use denss::engine::cancel::{AbortFlag, RunOutcome};
use denss::engine::pool::TaskPool;
use denss::engine::progress::{Progress, ProgressReporter};
use denss::engine::refinement::state::RefinementOutput;
use denss::workflows::output::OutputSpec;
use denss::workflows::reconstruct::{self, BatchOptions};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn run(args: ReconstructArgs, ui_sender: mpsc::Sender<UiEvent>, abort: AbortFlag) -> Result<()> {
    let partial = PartialConfig::load(args.config.as_deref())?;
    info!("Merging configuration from file and CLI arguments...");
    let config = partial.merge_with_cli(&args)?;
    let runs = partial.runs(args.runs);
    if args.average && runs < 2 {
        return Err(CliError::Argument(format!(
            "--average needs at least two runs, got {runs}"
        )));
    }
    let averaging = if args.average {
        Some(partial.averaging_config(false)?)
    } else {
        None
    };

    let prefix = args
        .output
        .prefix
        .clone()
        .unwrap_or_else(|| default_prefix(&args.profile, "denss"));
    let output = OutputSpec::new(&args.output.output_dir, prefix)
        .with_xplor(partial.xplor(args.output.xplor));

    info!("Loading scattering profile from {:?}", &args.profile);
    let curve =
        read_profile_from_path(&args.profile).map_err(|e| CliError::parsing(&args.profile, e))?;
    info!(
        points = curve.len(),
        q_min = curve.q_min(),
        q_max = curve.q_max(),
        "Scattering profile loaded."
    );

    let progress_handler = CliProgressHandler::new(ui_sender);
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Starting {} reconstruction(s) with Dmax = {} A and {} steps at most...",
        runs,
        config.dmax,
        config.step_budget()
    );

    if runs == 1 {
        reporter.report(Progress::PhaseStart {
            name: "Reconstruction",
        });
        let outcome = tokio::task::block_in_place(|| {
            reconstruct::run(&curve, &config, &output, &abort, &reporter)
        })?;
        reporter.report(Progress::PhaseFinish);
        match outcome {
            RunOutcome::Completed(result) => print_run(&output, &result),
            RunOutcome::Aborted => {
                warn!("Reconstruction aborted before completion.");
                println!("Aborted.");
            }
        }
        return Ok(());
    }

    let options = BatchOptions {
        runs,
        averaging,
        refine: args.refine,
    };
    let pool = TaskPool::new(abort);
    let outcome = tokio::task::block_in_place(|| {
        reconstruct::run_batch(&curve, &config, &options, &output, &pool, &reporter)
    })?;

    let RunOutcome::Completed(batch) = outcome else {
        warn!("Batch aborted before completion.");
        println!("Aborted.");
        return Ok(());
    };
    for (index, result) in batch.runs.iter().enumerate() {
        print_run(&output.child(&format!("_{:02}", index + 1)), result);
    }
    if let Some(ensemble) = &batch.ensemble {
        println!(
            "✓ Averaged {} of {} maps (mean score {:.4} ± {:.4}), resolution {:.1} A: {}",
            ensemble.accepted_count(),
            ensemble.scores.len(),
            ensemble.mean_score,
            ensemble.std_score,
            ensemble.resolution,
            output.path("_average.mrc").display()
        );
    }
    if let Some(refined) = &batch.refined {
        print_run(&output.child("_refine"), refined);
    }
    Ok(())
}

fn print_run(output: &OutputSpec, result: &RefinementOutput) {
    println!(
        "✓ {} steps, chi2 {:.3e}, Rg {:.2} A, support volume {:.3e} A^3 (seed {}): {}",
        result.steps,
        result.final_chi2(),
        result.final_rg(),
        result.final_support_volume(),
        result.seed,
        output.path(".mrc").display()
    );
}
