mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod ui;

use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};
use crate::ui::UiManager;
use clap::Parser;
use denss::engine::cancel::AbortFlag;
use tokio::task;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Raises `abort` on the first Ctrl-C so running work stops at its next checkpoint.
fn spawn_interrupt_watcher(abort: AbortFlag) -> task::JoinHandle<()> {
    task::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next checkpoint...");
            abort.raise();
        }
    })
}

async fn run_app() -> Result<()> {
    let (ui_manager, ui_sender, shutdown_sender) = UiManager::new();
    let ui_handle = task::spawn(ui_manager.run());

    let cli = Cli::parse();
    logging::init(
        logging::Verbosity::from_flags(cli.verbose, cli.quiet),
        cli.log_file.as_deref(),
    )?;

    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default().into_hooks();
    eyre_hook.install().map_err(|e| CliError::Other(e.into()))?;
    std::panic::set_hook(Box::new(move |pi| {
        error!("{}", panic_hook.panic_report(pi));
    }));

    let abort = AbortFlag::new();
    let interrupt_handle = spawn_interrupt_watcher(abort.clone());

    let command_result = async {
        info!("🚀 DENSS CLI v{} starting up.", env!("CARGO_PKG_VERSION"));
        debug!("Full CLI arguments parsed: {:?}", &cli);

        if let Some(num_threads) = cli.threads {
            info!(
                "Setting Rayon global thread pool to {} threads.",
                num_threads
            );
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .map_err(|e| {
                    CliError::Other(anyhow::anyhow!("Failed to build global thread pool: {}", e))
                })?;
        }

        match cli.command {
            Commands::Reconstruct(args) => {
                info!("Dispatching to 'reconstruct' command.");
                commands::reconstruct::run(args, ui_sender, abort).await
            }
            Commands::Average(args) => {
                info!("Dispatching to 'average' command.");
                commands::average::run(args, ui_sender, abort).await
            }
            Commands::Align(args) => {
                info!("Dispatching to 'align' command.");
                commands::align::run(args, ui_sender, abort).await
            }
        }
    }
    .await;

    interrupt_handle.abort();

    match &command_result {
        Ok(_) => {
            info!("✅ Command completed successfully.");
            println!("✅ Command completed successfully.");
        }
        Err(e) => {
            error!("❌ Command failed: {}", e);
            eprintln!("❌ Command failed: {}", e);
        }
    }

    if shutdown_sender.send(true).is_err() {
        warn!("UI manager may have already exited before shutdown signal.");
    }

    ui_handle
        .await
        .map_err(|e| CliError::Other(anyhow::anyhow!("UI manager task failed: {}", e)))?;

    command_result
}
