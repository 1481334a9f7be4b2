//! The iterative density refinement loop.
//!
//! Each step projects the current density onto the set of maps whose spherically
//! averaged intensity matches the measured curve ([`reciprocal`]), then onto the set of
//! maps satisfying the real-space constraints ([`constraints`]). The support shrinks
//! periodically around the blurred density until the χ² history flattens out.

pub mod constraints;
pub mod reciprocal;
pub mod state;

use self::constraints as rs;
use self::reciprocal::ReciprocalProjector;
use self::state::{FitCurve, ReconstructionTrace, RefinementOutput, SnapshotSink};
use super::alignment::principal::align_to_principal_axes;
use super::cancel::{AbortFlag, RunOutcome};
use super::config::ReconstructionConfig;
use super::curve_prep::PreparedCurve;
use super::error::EngineError;
use super::progress::{Progress, ProgressReporter};
use crate::core::grid::{FrequencyScale, QShells, RealSpaceGrid};
use crate::core::models::curve::ScatteringCurve;
use crate::core::models::density::{DensityMap, SupportMask};
use crate::core::utils::{resample, stats};
use ndarray::Array3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument, warn};

/// Upper bound (exclusive) for seeds drawn when none is configured.
const MAX_RANDOM_SEED: u64 = (1 << 31) - 1;
/// Density below this many electrons per Å³ is flattened to zero.
const LOW_DENSITY_THRESHOLD: f64 = 0.01;

/// One reconstruction run, set up for a given curve and configuration.
///
/// Construction builds the grid, the shell labeling and the prepared curve once; `run`
/// then iterates from a random or supplied starting density.
#[derive(Debug, Clone)]
pub struct Refinement<'a> {
    config: &'a ReconstructionConfig,
    grid: RealSpaceGrid,
    projector: ReciprocalProjector,
    seed: u64,
    run_index: usize,
}

impl<'a> Refinement<'a> {
    pub fn new(curve: &ScatteringCurve, config: &'a ReconstructionConfig) -> Result<Self, EngineError> {
        let grid = RealSpaceGrid::from_voxel_size(config.box_side(), config.voxel_size)?;
        let shells = QShells::new(grid.n(), grid.side(), FrequencyScale::Angular)?;
        let prepared = PreparedCurve::new(curve, &shells, config.electrons, config.extrapolate)?;
        let seed = config
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..MAX_RANDOM_SEED));
        Ok(Self {
            config,
            projector: ReciprocalProjector::new(grid.n(), shells, prepared),
            grid,
            seed,
            run_index: 0,
        })
    }

    /// Tags progress events and log lines with `index`.
    pub fn with_run_index(mut self, index: usize) -> Self {
        self.run_index = index;
        self
    }

    pub fn grid(&self) -> &RealSpaceGrid {
        &self.grid
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn prepared_curve(&self) -> &PreparedCurve {
        self.projector.curve()
    }

    fn log_setup(&self, budget: usize) {
        let config = self.config;
        let curve = self.projector.curve();
        let shells = self.projector.shells();
        info!(
            q_min = curve.q().first().copied().unwrap_or(f64::NAN),
            q_max = curve.q().last().copied().unwrap_or(f64::NAN),
            dmax = config.dmax,
            oversampling = config.oversampling,
            voxel_size = config.voxel_size,
            electrons = config.electrons,
            "Input parameters."
        );
        debug!(
            positivity = config.positivity,
            extrapolate = config.extrapolate,
            flatten_low_density = config.flatten_low_density,
            minimum_density = ?config.minimum_density,
            maximum_density = ?config.maximum_density,
            recenter = ?config.recenter,
            shrinkwrap = ?config.shrinkwrap,
            connectivity = ?config.connectivity,
            ncs = ?config.ncs,
            dmax_limit = ?config.dmax_limit,
            chi_end_fraction = config.convergence.chi_end_fraction,
            "Refinement options."
        );
        info!(
            max_steps = budget,
            grid = self.grid.n(),
            side = self.grid.side(),
            voxel_size = self.grid.voxel_size(),
            voxel_volume = self.grid.voxel_volume(),
            shells = shells.len(),
            shell_width = shells.step(),
            seed = self.seed,
            "Grid prepared."
        );
    }

    /// Runs the refinement to convergence or to the step budget.
    ///
    /// `warm_start` must be in electrons per voxel on this run's grid. The abort flag is
    /// polled before every step; an abort returns `RunOutcome::Aborted` without output.
    #[instrument(skip_all, name = "refinement", fields(run = self.run_index, seed = self.seed))]
    pub fn run(
        &self,
        warm_start: Option<&DensityMap>,
        abort: &AbortFlag,
        reporter: &ProgressReporter,
        snapshots: &mut dyn SnapshotSink,
    ) -> Result<RunOutcome<RefinementOutput>, EngineError> {
        let config = self.config;
        let n = self.grid.n();
        let side = self.grid.side();
        let dx = self.grid.voxel_size();
        let dv = self.grid.voxel_volume();
        let radius = self.grid.radius();
        let budget = config.step_budget();
        self.log_setup(budget);

        let mut rho = match warm_start {
            Some(map) if map.n() != n => {
                return Err(EngineError::GridMismatch {
                    expected: n,
                    found: map.n(),
                });
            }
            Some(map) => map.data().clone(),
            None => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                Array3::from_shape_fn((n, n, n), |_| rng.r#gen::<f64>())
            }
        };
        let mut support = SupportMask::full(n);
        let mut trace = ReconstructionTrace::with_capacity(budget + 1);
        let mut sigma = config.shrinkwrap.sigma_start;
        let minimum = config.minimum_density.map(|v| v * dv);
        let maximum = config.maximum_density.map(|v| v * dv);
        let sw = &config.shrinkwrap;
        let conv = &config.convergence;
        let mode = config.recenter.mode;
        let mut executed = 0;

        for step in 0..budget {
            if abort.is_raised() {
                info!(step, "Aborted.");
                return Ok(RunOutcome::Aborted);
            }

            let projection = self.projector.project(&rho);
            let mut next = projection.density;

            if step % config.write_frequency == 0 {
                let snapshot = DensityMap::new(next.mapv(|v| v / dv), side)?;
                snapshots.offer(step, &snapshot)?;
            }
            let rg = rs::radius_of_gyration(&next, &support, radius, dx);

            rs::apply_support(&mut next, &support);
            if config.positivity {
                rs::enforce_positivity(&mut next);
            }
            if config.flatten_low_density {
                rs::flatten_low_density(&mut next, LOW_DENSITY_THRESHOLD * dv);
            }
            if let Some(minimum) = minimum {
                rs::clamp_minimum(&mut next, minimum);
            }
            if let Some(maximum) = maximum {
                rs::clamp_maximum(&mut next, maximum);
            }

            if let Some(ncs) = &config.ncs {
                if ncs.steps.contains(&step) {
                    let map = DensityMap::new(next, side)?;
                    next = align_to_principal_axes(&map).map.into_data();
                    debug!(step, "Aligned density to its principal axes.");
                }
                if ncs.steps.iter().any(|&s| s + 1 == step) {
                    next = rs::symmetrize(&next, ncs.fold, ncs.axis.index());
                    debug!(step, fold = ncs.fold, axis = ?ncs.axis, "Applied symmetry averaging.");
                }
            }

            if config.recenter.enabled && config.recenter.steps.contains(&step) {
                let shift = rs::recenter(&mut next, mode);
                support = SupportMask::from_array(resample::roll(support.as_array(), shift));
            }

            if sw.enabled && step >= sw.min_step && step % sw.iterations == 1 {
                rs::recenter(&mut next, mode);
                let absolute = step > sw.absolute_after_step;
                support = rs::blurred_support(&next, sigma, sw.threshold_fraction, absolute);
                if sigma > sw.sigma_end {
                    sigma *= sw.sigma_decay;
                }
            }

            if config.connectivity.enabled && config.connectivity.steps.contains(&step) {
                rs::recenter(&mut next, mode);
                let regions = rs::keep_largest_component(&mut next, sigma, sw.threshold_fraction);
                debug!(step, regions, "Enforced connectivity.");
                support = SupportMask::full(n);
            }

            if config.dmax_limit.enabled && config.dmax_limit.steps.contains(&step) {
                rs::limit_dmax(&mut next, radius, config.dmax);
            }

            let support_volume = support.volume(dv);
            trace.push(projection.chi2, rg, support_volume);
            reporter.report(Progress::Step {
                run: self.run_index,
                step,
                chi2: projection.chi2,
                rg,
                support_volume,
            });
            if step % config.write_frequency == 0 {
                info!(step, chi2 = projection.chi2, rg, support_volume, "Refinement step.");
            } else {
                debug!(step, chi2 = projection.chi2, rg, support_volume, "Refinement step.");
            }

            rho = next;
            executed = step + 1;

            if step > conv.warmup_steps + sw.min_step && step >= conv.window {
                let window = &trace.chi2()[step - conv.window..step];
                let (_, spread) = stats::mean_std(window);
                if spread < conv.chi_end_fraction * stats::median(window) {
                    info!(step, "χ² converged.");
                    break;
                }
            }
        }

        let output = self.finalize(rho, support, trace, executed)?;
        info!(
            steps = output.steps,
            chi2 = output.final_chi2(),
            rg = output.final_rg(),
            support_volume = output.final_support_volume(),
            "Finished density refinement."
        );
        Ok(RunOutcome::Completed(output))
    }

    /// Final reciprocal projection, sign and electron-count normalization, conversion to
    /// e⁻/Å³ and the optional cutout.
    fn finalize(
        &self,
        rho: Array3<f64>,
        support: SupportMask,
        mut trace: ReconstructionTrace,
        executed: usize,
    ) -> Result<RefinementOutput, EngineError> {
        let config = self.config;
        let dv = self.grid.voxel_volume();
        let projection = self.projector.project(&rho);
        let mut density = projection.density;

        let negative: f64 = density.iter().filter(|&&v| v < 0.0).map(|v| -v).sum();
        let positive: f64 = density.iter().filter(|&&v| v > 0.0).sum();
        if negative > positive {
            density.mapv_inplace(|v| -v);
        }
        let total = density.sum();
        if total != 0.0 {
            let factor = config.electrons / total;
            density.mapv_inplace(|v| v * factor);
        }

        let rg = rs::radius_of_gyration(&density, &support, self.grid.radius(), self.grid.voxel_size());
        let support_volume = trace
            .support_volume()
            .last()
            .copied()
            .unwrap_or_else(|| support.volume(dv));
        if density_collapsed(total, rg) {
            warn!(
                steps = executed,
                total,
                rg,
                "Density collapsed to an empty map; the result carries no structure."
            );
        }
        trace.push(projection.chi2, rg, support_volume);

        density.mapv_inplace(|v| v / dv);
        let mut map = DensityMap::new(density, self.grid.side())?;
        let mut support = support;
        if config.cutout {
            let (cut_map, cut_support) = self.cutout(&map, &support);
            map = cut_map;
            support = cut_support;
        }

        let curve = self.projector.curve();
        let scale = curve.scale_factor();
        let fit = FitCurve {
            q_data: curve.q_data().to_vec(),
            i_data: curve.i_data().iter().map(|v| v / scale).collect(),
            sigma_data: curve.sigma_data().iter().map(|v| v / scale).collect(),
            q_model: self.projector.shells().centers().to_vec(),
            i_model: projection.shell_intensity.iter().map(|v| v / scale).collect(),
        };

        Ok(RefinementOutput {
            map,
            support,
            trace,
            fit,
            scale_factor: scale,
            steps: executed,
            seed: self.seed,
        })
    }

    /// Crops to a box of about `2·Dmax` around the grid center; returns the inputs when
    /// that box does not fit.
    fn cutout(&self, map: &DensityMap, support: &SupportMask) -> (DensityMap, SupportMask) {
        let n = self.grid.n();
        let mut span = (2.0 * self.config.dmax / self.grid.voxel_size()) as usize + 1;
        if span % 2 == 1 {
            span += 1;
        }
        let size = span + 2;
        let cropped = (n / 2)
            .checked_sub(span / 2)
            .and_then(|start| Some((map.crop(start, size)?, support.crop(start, size)?)));
        match cropped {
            Some(pair) => pair,
            None => {
                debug!(grid = n, size, "Cutout box does not fit in the grid; keeping the full box.");
                (map.clone(), support.clone())
            }
        }
    }
}

/// An empty or non-finite final density, or one whose radius of gyration is undefined.
fn density_collapsed(total: f64, rg: f64) -> bool {
    total == 0.0 || !total.is_finite() || !rg.is_finite()
}
