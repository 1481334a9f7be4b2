use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "DENSS Rust Developers",
    version,
    about = "DENSS CLI - Electron density reconstruction from solution scattering profiles, with map alignment and ensemble averaging.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconstruct electron density from a scattering profile, optionally averaging and refining several runs.
    Reconstruct(ReconstructArgs),
    /// Align, select enantiomers of and average a set of density maps.
    Average(AverageArgs),
    /// Align density maps onto a reference map.
    Align(AlignArgs),
}

/// Output location shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Directory receiving all output files.
    #[arg(short, long = "output-dir", default_value = ".", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// File name prefix for all outputs. Defaults to a name derived from the input.
    #[arg(long, value_name = "NAME")]
    pub prefix: Option<String>,

    /// Also write XPLOR copies of the output maps.
    #[arg(long)]
    pub xplor: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisArg {
    X,
    Y,
    Z,
}

/// Arguments for the `reconstruct` subcommand.
#[derive(Args, Debug)]
pub struct ReconstructArgs {
    // --- Core Arguments ---
    /// Scattering profile with `q I sigma` columns (q in inverse Angstrom).
    #[arg(required = true, value_name = "PROFILE")]
    pub profile: PathBuf,

    /// Maximum particle dimension in Angstrom.
    #[arg(short, long, value_name = "FLOAT")]
    pub dmax: Option<f64>,

    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,

    // --- Batch Options ---
    /// Number of independent reconstructions to run.
    #[arg(short = 'n', long, value_name = "INT")]
    pub runs: Option<usize>,

    /// Align and average the runs (needs at least two runs).
    #[arg(long)]
    pub average: bool,

    /// Refine the average by running the reconstruction once more from it.
    #[arg(long, requires = "average")]
    pub refine: bool,

    // --- Reconstruction Overrides ---
    /// Number of electrons in the particle.
    #[arg(long, value_name = "FLOAT")]
    pub electrons: Option<f64>,

    /// Voxel size in Angstrom.
    #[arg(long, value_name = "FLOAT")]
    pub voxel_size: Option<f64>,

    /// Box side length as a multiple of Dmax.
    #[arg(long, value_name = "FLOAT")]
    pub oversampling: Option<f64>,

    /// Hard cap on the number of refinement steps.
    #[arg(long, value_name = "INT")]
    pub steps: Option<usize>,

    /// Seed of the random starting density (run i uses seed + i - 1).
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Write the current density every this many steps.
    #[arg(long, value_name = "INT")]
    pub write_frequency: Option<usize>,

    /// Minimum density in e-/A^3.
    #[arg(long, value_name = "FLOAT", allow_negative_numbers = true)]
    pub min_density: Option<f64>,

    /// Maximum density in e-/A^3.
    #[arg(long, value_name = "FLOAT")]
    pub max_density: Option<f64>,

    /// Apply N-fold symmetry averaging.
    #[arg(long, value_name = "FOLD")]
    pub ncs: Option<usize>,

    /// Symmetry axis used with --ncs.
    #[arg(long, value_enum, requires = "ncs")]
    pub ncs_axis: Option<AxisArg>,

    /// Taper density beyond Dmax from the box center.
    #[arg(long)]
    pub limit_dmax: bool,

    /// Disable the positivity constraint.
    #[arg(long)]
    pub no_positivity: bool,

    /// Disable extrapolation of the profile to the corner of reciprocal space.
    #[arg(long)]
    pub no_extrapolate: bool,

    /// Disable shrinkwrap support updates.
    #[arg(long)]
    pub no_shrinkwrap: bool,

    /// Disable periodic recentering.
    #[arg(long)]
    pub no_recenter: bool,

    /// Disable the connectivity constraint.
    #[arg(long)]
    pub no_connectivity: bool,

    /// Keep the full box instead of cutting the final map down to 2 x Dmax.
    #[arg(long)]
    pub no_cutout: bool,
}

/// Arguments for the `average` subcommand.
#[derive(Args, Debug)]
pub struct AverageArgs {
    /// MRC maps to average. All maps must share one grid.
    #[arg(required = true, num_args = 1.., value_name = "MAPS")]
    pub maps: Vec<PathBuf>,

    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Resolve handedness against the first map before building the reference.
    #[arg(long)]
    pub enantiomer_preselect: bool,
}

/// Arguments for the `align` subcommand.
#[derive(Args, Debug)]
pub struct AlignArgs {
    /// MRC maps to align.
    #[arg(required = true, num_args = 1.., value_name = "MAPS")]
    pub maps: Vec<PathBuf>,

    /// MRC map all others are aligned onto.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub reference: PathBuf,

    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,

    /// Keep each map's handedness instead of choosing the better-fitting mirror image.
    #[arg(long)]
    pub no_enantiomer: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstruct_arguments_parse() {
        let cli = Cli::parse_from([
            "denss", "-vv", "reconstruct", "lys.dat", "--dmax", "50", "-n", "8", "--average",
            "--refine", "--seed", "3", "--ncs", "2", "--ncs-axis", "z",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Reconstruct(args) = cli.command else {
            panic!("expected reconstruct");
        };
        assert_eq!(args.dmax, Some(50.0));
        assert_eq!(args.runs, Some(8));
        assert!(args.average && args.refine);
        assert_eq!(args.ncs_axis, Some(AxisArg::Z));
        assert_eq!(args.output.output_dir, PathBuf::from("."));
    }

    #[test]
    fn refine_requires_average() {
        let result = Cli::try_parse_from(["denss", "reconstruct", "lys.dat", "--refine"]);
        assert!(result.is_err());
    }

    #[test]
    fn align_requires_a_reference() {
        let result = Cli::try_parse_from(["denss", "align", "a.mrc"]);
        assert!(result.is_err());
        let cli = Cli::parse_from(["denss", "align", "a.mrc", "b.mrc", "-r", "ref.mrc"]);
        let Commands::Align(args) = cli.command else {
            panic!("expected align");
        };
        assert_eq!(args.maps.len(), 2);
        assert!(!args.no_enantiomer);
    }
}
