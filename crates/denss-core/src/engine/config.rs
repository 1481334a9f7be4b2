use serde::Deserialize;
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidValue {
        parameter: &'static str,
        reason: String,
    },
}

fn invalid(parameter: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        parameter,
        reason: reason.into(),
    }
}

/// Step after which shrinkwrap blurs `|ρ|` instead of the signed density.
pub const SHRINKWRAP_ABSOLUTE_AFTER_STEP: usize = 500;
/// Steps added to the shrinkwrap schedule so the run can converge after it ends.
pub const STEP_SAFETY_MARGIN: usize = 7621;
/// Number of trailing chi² values inspected by the convergence test.
pub const CONVERGENCE_WINDOW: usize = 100;
/// Steps after the shrinkwrap start before convergence is tested.
pub const CONVERGENCE_WARMUP_STEPS: usize = 101;
pub const DEFAULT_ELECTRONS: f64 = 10000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecenterMode {
    /// Center of mass.
    #[default]
    Com,
    /// Position of the largest voxel.
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymmetryAxis {
    #[default]
    X,
    Y,
    Z,
}

impl SymmetryAxis {
    pub fn index(self) -> usize {
        match self {
            SymmetryAxis::X => 0,
            SymmetryAxis::Y => 1,
            SymmetryAxis::Z => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RecenterConfig {
    pub enabled: bool,
    pub steps: Vec<usize>,
    pub mode: RecenterMode,
}

impl Default for RecenterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            steps: (1001..=8001).step_by(500).collect(),
            mode: RecenterMode::Com,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ShrinkwrapConfig {
    pub enabled: bool,
    /// Initial blur width, in voxels.
    pub sigma_start: f64,
    pub sigma_end: f64,
    pub sigma_decay: f64,
    pub threshold_fraction: f64,
    /// Support is updated on steps where `step % iterations == 1`.
    pub iterations: usize,
    pub min_step: usize,
    pub absolute_after_step: usize,
}

impl Default for ShrinkwrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sigma_start: 3.0,
            sigma_end: 1.5,
            sigma_decay: 0.99,
            threshold_fraction: 0.2,
            iterations: 20,
            min_step: 100,
            absolute_after_step: SHRINKWRAP_ABSOLUTE_AFTER_STEP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConnectivityConfig {
    pub enabled: bool,
    pub steps: Vec<usize>,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            steps: vec![500],
        }
    }
}

/// N-fold non-crystallographic symmetry averaging.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct NcsConfig {
    pub fold: usize,
    pub axis: SymmetryAxis,
    /// Principal axes are aligned on each listed step and the symmetry average is taken
    /// on the step after it.
    pub steps: Vec<usize>,
}

impl Default for NcsConfig {
    fn default() -> Self {
        Self {
            fold: 2,
            axis: SymmetryAxis::X,
            steps: vec![500],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct DmaxLimitConfig {
    pub enabled: bool,
    pub steps: Vec<usize>,
}

impl Default for DmaxLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            steps: vec![500],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConvergenceConfig {
    pub chi_end_fraction: f64,
    pub window: usize,
    pub warmup_steps: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            chi_end_fraction: 0.01,
            window: CONVERGENCE_WINDOW,
            warmup_steps: CONVERGENCE_WARMUP_STEPS,
        }
    }
}

/// Full parameter set for one reconstruction run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionConfig {
    /// Maximum particle dimension in Å.
    pub dmax: f64,
    pub electrons: f64,
    pub voxel_size: f64,
    pub oversampling: f64,
    pub positivity: bool,
    pub extrapolate: bool,
    pub flatten_low_density: bool,
    /// Lower/upper density bounds in e⁻/Å³.
    pub minimum_density: Option<f64>,
    pub maximum_density: Option<f64>,
    pub cutout: bool,
    pub write_frequency: usize,
    /// Explicit step cap; when `None` the cap is derived from the shrinkwrap schedule.
    pub max_steps: Option<usize>,
    pub safety_margin_steps: usize,
    pub seed: Option<u64>,
    pub recenter: RecenterConfig,
    pub shrinkwrap: ShrinkwrapConfig,
    pub connectivity: ConnectivityConfig,
    pub ncs: Option<NcsConfig>,
    pub dmax_limit: DmaxLimitConfig,
    pub convergence: ConvergenceConfig,
}

impl ReconstructionConfig {
    pub fn builder() -> ReconstructionConfigBuilder {
        ReconstructionConfigBuilder::new()
    }

    /// Box side length, `oversampling · Dmax`.
    pub fn box_side(&self) -> f64 {
        self.oversampling * self.dmax
    }

    /// Maximum number of refinement steps.
    pub fn step_budget(&self) -> usize {
        if let Some(steps) = self.max_steps.filter(|&s| s >= 1) {
            return steps;
        }
        let sw = &self.shrinkwrap;
        let schedule = sw.iterations as f64 * (sw.sigma_end / sw.sigma_start).ln() / sw.sigma_decay.ln();
        let last_event = self
            .connectivity
            .steps
            .iter()
            .copied()
            .chain(std::iter::once(sw.min_step))
            .max()
            .unwrap_or(sw.min_step);
        (schedule + last_event as f64).max(0.0) as usize + self.safety_margin_steps
    }
}

#[derive(Default)]
pub struct ReconstructionConfigBuilder {
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
    recenter: Option<RecenterConfig>,
    shrinkwrap: Option<ShrinkwrapConfig>,
    connectivity: Option<ConnectivityConfig>,
    ncs: Option<NcsConfig>,
    dmax_limit: Option<DmaxLimitConfig>,
    convergence: Option<ConvergenceConfig>,
}

impl ReconstructionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dmax(mut self, dmax: f64) -> Self {
        self.dmax = Some(dmax);
        self
    }
    pub fn electrons(mut self, electrons: f64) -> Self {
        self.electrons = Some(electrons);
        self
    }
    pub fn voxel_size(mut self, voxel_size: f64) -> Self {
        self.voxel_size = Some(voxel_size);
        self
    }
    pub fn oversampling(mut self, oversampling: f64) -> Self {
        self.oversampling = Some(oversampling);
        self
    }
    pub fn positivity(mut self, enabled: bool) -> Self {
        self.positivity = Some(enabled);
        self
    }
    pub fn extrapolate(mut self, enabled: bool) -> Self {
        self.extrapolate = Some(enabled);
        self
    }
    pub fn flatten_low_density(mut self, enabled: bool) -> Self {
        self.flatten_low_density = Some(enabled);
        self
    }
    pub fn minimum_density(mut self, value: Option<f64>) -> Self {
        self.minimum_density = value;
        self
    }
    pub fn maximum_density(mut self, value: Option<f64>) -> Self {
        self.maximum_density = value;
        self
    }
    pub fn cutout(mut self, enabled: bool) -> Self {
        self.cutout = Some(enabled);
        self
    }
    pub fn write_frequency(mut self, steps: usize) -> Self {
        self.write_frequency = Some(steps);
        self
    }
    pub fn max_steps(mut self, steps: Option<usize>) -> Self {
        self.max_steps = steps;
        self
    }
    pub fn safety_margin_steps(mut self, steps: usize) -> Self {
        self.safety_margin_steps = Some(steps);
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
    pub fn recenter(mut self, config: RecenterConfig) -> Self {
        self.recenter = Some(config);
        self
    }
    pub fn shrinkwrap(mut self, config: ShrinkwrapConfig) -> Self {
        self.shrinkwrap = Some(config);
        self
    }
    pub fn connectivity(mut self, config: ConnectivityConfig) -> Self {
        self.connectivity = Some(config);
        self
    }
    pub fn ncs(mut self, config: Option<NcsConfig>) -> Self {
        self.ncs = config;
        self
    }
    pub fn dmax_limit(mut self, config: DmaxLimitConfig) -> Self {
        self.dmax_limit = Some(config);
        self
    }
    pub fn convergence(mut self, config: ConvergenceConfig) -> Self {
        self.convergence = Some(config);
        self
    }

    pub fn build(self) -> Result<ReconstructionConfig, ConfigError> {
        let config = ReconstructionConfig {
            dmax: self.dmax.ok_or(ConfigError::MissingParameter("dmax"))?,
            electrons: self.electrons.unwrap_or(DEFAULT_ELECTRONS),
            voxel_size: self.voxel_size.unwrap_or(5.0),
            oversampling: self.oversampling.unwrap_or(3.0),
            positivity: self.positivity.unwrap_or(true),
            extrapolate: self.extrapolate.unwrap_or(true),
            flatten_low_density: self.flatten_low_density.unwrap_or(true),
            minimum_density: self.minimum_density,
            maximum_density: self.maximum_density,
            cutout: self.cutout.unwrap_or(true),
            write_frequency: self.write_frequency.unwrap_or(100),
            max_steps: self.max_steps,
            safety_margin_steps: self.safety_margin_steps.unwrap_or(STEP_SAFETY_MARGIN),
            seed: self.seed,
            recenter: self.recenter.unwrap_or_default(),
            shrinkwrap: self.shrinkwrap.unwrap_or_default(),
            connectivity: self.connectivity.unwrap_or_default(),
            ncs: self.ncs,
            dmax_limit: self.dmax_limit.unwrap_or_default(),
            convergence: self.convergence.unwrap_or_default(),
        };
        validate(&config)?;
        Ok(config)
    }
}

fn positive(parameter: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(parameter, format!("must be positive and finite, got {value}")))
    }
}

fn validate(config: &ReconstructionConfig) -> Result<(), ConfigError> {
    positive("dmax", config.dmax)?;
    positive("electrons", config.electrons)?;
    positive("voxel_size", config.voxel_size)?;
    positive("oversampling", config.oversampling)?;
    if config.write_frequency == 0 {
        return Err(invalid("write_frequency", "must be at least 1"));
    }
    if let (Some(lo), Some(hi)) = (config.minimum_density, config.maximum_density) {
        if lo >= hi {
            return Err(invalid(
                "minimum_density",
                format!("must be below maximum_density ({lo} >= {hi})"),
            ));
        }
    }

    let sw = &config.shrinkwrap;
    positive("shrinkwrap.sigma_start", sw.sigma_start)?;
    positive("shrinkwrap.sigma_end", sw.sigma_end)?;
    if !(sw.sigma_decay > 0.0 && sw.sigma_decay < 1.0) {
        return Err(invalid(
            "shrinkwrap.sigma_decay",
            format!("must lie in (0, 1), got {}", sw.sigma_decay),
        ));
    }
    if !(sw.threshold_fraction > 0.0 && sw.threshold_fraction <= 1.0) {
        return Err(invalid(
            "shrinkwrap.threshold_fraction",
            format!("must lie in (0, 1], got {}", sw.threshold_fraction),
        ));
    }
    if sw.iterations == 0 {
        return Err(invalid("shrinkwrap.iterations", "must be at least 1"));
    }

    if let Some(ncs) = &config.ncs {
        if ncs.fold < 2 {
            return Err(invalid(
                "ncs.fold",
                format!("symmetry order must be at least 2, got {}", ncs.fold),
            ));
        }
    }

    let conv = &config.convergence;
    positive("convergence.chi_end_fraction", conv.chi_end_fraction)?;
    if conv.window < 2 {
        return Err(invalid("convergence.window", "must be at least 2"));
    }
    Ok(())
}

/// Parameters of the coarse-then-fine rigid-body alignment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AlignmentConfig {
    /// Golden-spiral directions scored in the coarse search.
    pub coarse_directions: usize,
    /// Coarse candidates passed on to local refinement.
    pub top_candidates: usize,
    pub finite_difference_step: f64,
    pub max_iterations: usize,
    pub max_evaluations: usize,
    /// Bound on each Euler angle, in radians.
    pub angle_bound: f64,
    /// Bound on each translation component, in voxels.
    pub translation_bound: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            coarse_directions: 18,
            top_candidates: 5,
            finite_difference_step: 0.05,
            max_iterations: 100,
            max_evaluations: 200,
            angle_bound: 20.0 * PI,
            translation_bound: 5.0,
        }
    }
}

impl AlignmentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coarse_directions == 0 {
            return Err(invalid("alignment.coarse_directions", "must be at least 1"));
        }
        if self.top_candidates == 0 {
            return Err(invalid("alignment.top_candidates", "must be at least 1"));
        }
        positive("alignment.finite_difference_step", self.finite_difference_step)?;
        positive("alignment.angle_bound", self.angle_bound)?;
        positive("alignment.translation_bound", self.translation_bound)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AveragingConfig {
    /// Resolve every map's handedness against the first map before building the
    /// reference.
    pub enantiomer_preselect: bool,
    /// Maps scoring below `mean - outlier_sigma · std` are rejected.
    pub outlier_sigma: f64,
    pub fsc_threshold: f64,
    pub alignment: AlignmentConfig,
}

impl Default for AveragingConfig {
    fn default() -> Self {
        Self {
            enantiomer_preselect: false,
            outlier_sigma: 2.0,
            fsc_threshold: 0.5,
            alignment: AlignmentConfig::default(),
        }
    }
}

impl AveragingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.outlier_sigma.is_finite() && self.outlier_sigma >= 0.0) {
            return Err(invalid(
                "averaging.outlier_sigma",
                format!("must be non-negative, got {}", self.outlier_sigma),
            ));
        }
        if !(self.fsc_threshold > 0.0 && self.fsc_threshold < 1.0) {
            return Err(invalid(
                "averaging.fsc_threshold",
                format!("must lie in (0, 1), got {}", self.fsc_threshold),
            ));
        }
        self.alignment.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_dmax() {
        let result = ReconstructionConfig::builder().build();
        assert_eq!(result, Err(ConfigError::MissingParameter("dmax")));
    }

    #[test]
    fn builder_applies_defaults() {
        let config = ReconstructionConfig::builder().dmax(50.0).build().unwrap();
        assert_eq!(config.electrons, 10000.0);
        assert_eq!(config.voxel_size, 5.0);
        assert_eq!(config.box_side(), 150.0);
        assert_eq!(config.recenter.steps.first(), Some(&1001));
        assert_eq!(config.recenter.steps.last(), Some(&8001));
        assert_eq!(config.recenter.steps.len(), 15);
        assert!(config.ncs.is_none());
        assert!(!config.dmax_limit.enabled);
    }

    #[test]
    fn default_step_budget_matches_shrinkwrap_schedule() {
        let config = ReconstructionConfig::builder().dmax(50.0).build().unwrap();
        // 20 · ln(0.5)/ln(0.99) ≈ 1379.4, plus connectivity step 500, plus margin.
        assert_eq!(config.step_budget(), 1879 + STEP_SAFETY_MARGIN);
    }

    #[test]
    fn explicit_step_cap_wins() {
        let config = ReconstructionConfig::builder()
            .dmax(50.0)
            .max_steps(Some(42))
            .build()
            .unwrap();
        assert_eq!(config.step_budget(), 42);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let result = ReconstructionConfig::builder().dmax(-1.0).build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                parameter: "dmax",
                ..
            })
        ));

        let result = ReconstructionConfig::builder()
            .dmax(10.0)
            .ncs(Some(NcsConfig {
                fold: 1,
                ..NcsConfig::default()
            }))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                parameter: "ncs.fold",
                ..
            })
        ));
    }

    #[test]
    fn density_bounds_must_be_ordered() {
        let result = ReconstructionConfig::builder()
            .dmax(10.0)
            .minimum_density(Some(0.5))
            .maximum_density(Some(0.1))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn nested_sections_deserialize_from_kebab_case() {
        let sw: ShrinkwrapConfig =
            toml::from_str("sigma-start = 4.0\nthreshold-fraction = 0.25\n").unwrap();
        assert_eq!(sw.sigma_start, 4.0);
        assert_eq!(sw.threshold_fraction, 0.25);
        assert_eq!(sw.iterations, 20);

        let ncs: NcsConfig = toml::from_str("fold = 3\naxis = \"z\"\n").unwrap();
        assert_eq!(ncs.axis, SymmetryAxis::Z);
    }
}
