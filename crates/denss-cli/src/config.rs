use crate::cli::{AxisArg, ReconstructArgs};
use crate::error::{CliError, Result};
use denss::engine::config as core_config;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialReconstructionConfig {
    dmax: Option<f64>,
    electrons: Option<f64>,
    voxel_size: Option<f64>,
    oversampling: Option<f64>,
    positivity: Option<bool>,
    extrapolate: Option<bool>,
    flatten_low_density: Option<bool>,
    minimum_density: Option<f64>,
    maximum_density: Option<f64>,
    cutout: Option<bool>,
    write_frequency: Option<usize>,
    max_steps: Option<usize>,
    safety_margin_steps: Option<usize>,
    seed: Option<u64>,
    runs: Option<usize>,
    recenter: Option<core_config::RecenterConfig>,
    shrinkwrap: Option<core_config::ShrinkwrapConfig>,
    connectivity: Option<core_config::ConnectivityConfig>,
    ncs: Option<core_config::NcsConfig>,
    dmax_limit: Option<core_config::DmaxLimitConfig>,
    convergence: Option<core_config::ConvergenceConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialOutputConfig {
    xplor: Option<bool>,
}

/// Settings read from a TOML file; every field may be overridden on the command line.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialConfig {
    reconstruction: Option<PartialReconstructionConfig>,
    averaging: Option<core_config::AveragingConfig>,
    output: Option<PartialOutputConfig>,
}

impl PartialConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Reads `path` when given, otherwise starts from an empty configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn xplor(&self, cli_flag: bool) -> bool {
        cli_flag
            || self
                .output
                .as_ref()
                .and_then(|o| o.xplor)
                .unwrap_or(false)
    }

    pub fn runs(&self, cli_value: Option<usize>) -> usize {
        cli_value
            .or(self.reconstruction.as_ref().and_then(|r| r.runs))
            .unwrap_or(1)
    }

    pub fn averaging_config(&self, enantiomer_preselect: bool) -> Result<core_config::AveragingConfig> {
        let mut config = self.averaging.clone().unwrap_or_default();
        config.enantiomer_preselect |= enantiomer_preselect;
        config
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn merge_with_cli(&self, args: &ReconstructArgs) -> Result<core_config::ReconstructionConfig> {
        let file = self.reconstruction.clone().unwrap_or_default();

        let dmax = args.dmax.or(file.dmax).ok_or_else(|| {
            CliError::Config(
                "A value for 'dmax' is required either in the config file or via --dmax."
                    .to_string(),
            )
        })?;

        let mut builder = core_config::ReconstructionConfig::builder()
            .dmax(dmax)
            .positivity(!args.no_positivity && file.positivity.unwrap_or(true))
            .extrapolate(!args.no_extrapolate && file.extrapolate.unwrap_or(true))
            .cutout(!args.no_cutout && file.cutout.unwrap_or(true))
            .minimum_density(args.min_density.or(file.minimum_density))
            .maximum_density(args.max_density.or(file.maximum_density))
            .max_steps(args.steps.or(file.max_steps))
            .seed(args.seed.or(file.seed));

        if let Some(electrons) = args.electrons.or(file.electrons) {
            builder = builder.electrons(electrons);
        }
        if let Some(voxel_size) = args.voxel_size.or(file.voxel_size) {
            builder = builder.voxel_size(voxel_size);
        }
        if let Some(oversampling) = args.oversampling.or(file.oversampling) {
            builder = builder.oversampling(oversampling);
        }
        if let Some(flatten) = file.flatten_low_density {
            builder = builder.flatten_low_density(flatten);
        }
        if let Some(frequency) = args.write_frequency.or(file.write_frequency) {
            builder = builder.write_frequency(frequency);
        }
        if let Some(margin) = file.safety_margin_steps {
            builder = builder.safety_margin_steps(margin);
        }
        if let Some(convergence) = file.convergence {
            builder = builder.convergence(convergence);
        }

        let mut recenter = file.recenter.unwrap_or_default();
        recenter.enabled &= !args.no_recenter;
        let mut shrinkwrap = file.shrinkwrap.unwrap_or_default();
        shrinkwrap.enabled &= !args.no_shrinkwrap;
        let mut connectivity = file.connectivity.unwrap_or_default();
        connectivity.enabled &= !args.no_connectivity;
        let mut dmax_limit = file.dmax_limit.unwrap_or_default();
        dmax_limit.enabled |= args.limit_dmax;

        builder = builder
            .recenter(recenter)
            .shrinkwrap(shrinkwrap)
            .connectivity(connectivity)
            .dmax_limit(dmax_limit)
            .ncs(Self::merge_ncs(args, file.ncs));

        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    fn merge_ncs(
        args: &ReconstructArgs,
        file_value: Option<core_config::NcsConfig>,
    ) -> Option<core_config::NcsConfig> {
        let mut ncs = match (args.ncs, file_value) {
            (None, file_value) => file_value,
            (Some(fold), Some(file_value)) => Some(core_config::NcsConfig { fold, ..file_value }),
            (Some(fold), None) => Some(core_config::NcsConfig {
                fold,
                ..core_config::NcsConfig::default()
            }),
        };
        if let (Some(ncs), Some(axis)) = (ncs.as_mut(), args.ncs_axis) {
            ncs.axis = match axis {
                AxisArg::X => core_config::SymmetryAxis::X,
                AxisArg::Y => core_config::SymmetryAxis::Y,
                AxisArg::Z => core_config::SymmetryAxis::Z,
            };
        }
        ncs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_config_file(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("denss.toml");
        fs::write(&path, content).unwrap();
        path
    }

    fn reconstruct_args(extra: &[&str]) -> ReconstructArgs {
        let mut argv = vec!["denss", "reconstruct", "profile.dat"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Reconstruct(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn file_values_are_used_when_cli_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config_file(
            &dir,
            r#"
            [reconstruction]
            dmax = 60.0
            voxel-size = 4.0
            runs = 4

            [reconstruction.shrinkwrap]
            sigma-start = 2.5

            [output]
            xplor = true
            "#,
        );
        let partial = PartialConfig::from_file(&path).unwrap();
        let config = partial.merge_with_cli(&reconstruct_args(&[])).unwrap();
        assert_eq!(config.dmax, 60.0);
        assert_eq!(config.voxel_size, 4.0);
        assert_eq!(config.shrinkwrap.sigma_start, 2.5);
        assert!(config.shrinkwrap.enabled);
        assert_eq!(partial.runs(None), 4);
        assert!(partial.xplor(false));
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config_file(
            &dir,
            "[reconstruction]\ndmax = 60.0\nseed = 1\n[reconstruction.ncs]\nfold = 3\n",
        );
        let partial = PartialConfig::from_file(&path).unwrap();
        let args = reconstruct_args(&[
            "--dmax", "45", "--seed", "9", "--no-shrinkwrap", "--ncs-axis", "y", "--ncs", "4",
        ]);
        let config = partial.merge_with_cli(&args).unwrap();
        assert_eq!(config.dmax, 45.0);
        assert_eq!(config.seed, Some(9));
        assert!(!config.shrinkwrap.enabled);
        let ncs = config.ncs.unwrap();
        assert_eq!(ncs.fold, 4);
        assert_eq!(ncs.axis, core_config::SymmetryAxis::Y);
        assert_eq!(partial.runs(Some(2)), 2);
    }

    #[test]
    fn missing_dmax_is_a_configuration_error() {
        let result = PartialConfig::default().merge_with_cli(&reconstruct_args(&[]));
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("dmax")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config_file(&dir, "[reconstruction]\ndmx = 50.0\n");
        let result = PartialConfig::from_file(&path);
        assert!(matches!(result, Err(CliError::FileParsing { .. })));
    }

    #[test]
    fn averaging_section_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config_file(&dir, "[averaging]\nfsc-threshold = 1.5\n");
        let partial = PartialConfig::from_file(&path).unwrap();
        assert!(matches!(partial.averaging_config(false), Err(CliError::Config(_))));

        let config = PartialConfig::default().averaging_config(true).unwrap();
        assert!(config.enantiomer_preselect);
    }
}
