use crate::error::{CliError, Result};
use denss::workflows::output::file_layer;
use std::path::Path;
use tracing::Subscriber;
use tracing_subscriber::{Layer, filter::LevelFilter, fmt, prelude::*, registry::LookupSpan};

/// Console verbosity picked with `-q` and repeated `-v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Warnings,
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Verbosity::Quiet,
            (false, 0) => Verbosity::Warnings,
            (false, 1) => Verbosity::Info,
            (false, 2) => Verbosity::Debug,
            (false, _) => Verbosity::Trace,
        }
    }

    pub fn console_level(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::ERROR,
            Verbosity::Warnings => LevelFilter::WARN,
            Verbosity::Info => LevelFilter::INFO,
            Verbosity::Debug => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }

    /// The session log records INFO and above even when the console is quieter.
    pub fn session_level(self) -> LevelFilter {
        self.console_level().max(LevelFilter::INFO)
    }
}

/// Session log opened with `--log-file`, in the same line format as the per-run
/// `<prefix>.log` files. Missing parent directories are created.
fn session_layer<S>(
    path: &Path,
    verbosity: Verbosity,
) -> Result<impl Layer<S> + Send + Sync + use<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let layer = file_layer(path).map_err(|source| CliError::LogFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(layer.with_filter(verbosity.session_level()))
}

/// Installs the global subscriber: compact lines on stderr, leaving stdout to progress
/// bars and result lines, plus the optional session log.
pub fn init(verbosity: Verbosity, log_file: Option<&Path>) -> Result<()> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .with_filter(verbosity.console_level());
    let session = log_file
        .map(|path| session_layer(path, verbosity))
        .transpose()?;

    tracing_subscriber::registry()
        .with(console)
        .with(session)
        .try_init()
        .map_err(|e| CliError::Other(e.into()))
}
