use crate::core::models::density::{DensityMap, SupportMask};
use crate::engine::error::EngineError;

/// Per-step diagnostics of one refinement run. After finalization it holds one entry per
/// executed step plus the final pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconstructionTrace {
    chi2: Vec<f64>,
    rg: Vec<f64>,
    support_volume: Vec<f64>,
}

impl ReconstructionTrace {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chi2: Vec::with_capacity(capacity),
            rg: Vec::with_capacity(capacity),
            support_volume: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, chi2: f64, rg: f64, support_volume: f64) {
        self.chi2.push(chi2);
        self.rg.push(rg);
        self.support_volume.push(support_volume);
    }

    pub fn len(&self) -> usize {
        self.chi2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chi2.is_empty()
    }

    pub fn chi2(&self) -> &[f64] {
        &self.chi2
    }

    pub fn rg(&self) -> &[f64] {
        &self.rg
    }

    pub fn support_volume(&self) -> &[f64] {
        &self.support_volume
    }

    pub fn last(&self) -> Option<(f64, f64, f64)> {
        let i = self.len().checked_sub(1)?;
        Some((self.chi2[i], self.rg[i], self.support_volume[i]))
    }
}

/// Measured and model intensities on the run's shells, in measured intensity units.
#[derive(Debug, Clone, PartialEq)]
pub struct FitCurve {
    pub q_data: Vec<f64>,
    pub i_data: Vec<f64>,
    pub sigma_data: Vec<f64>,
    /// Every shell center of the grid.
    pub q_model: Vec<f64>,
    /// Shell-averaged `|F|²` of the final map; `NaN` for empty shells.
    pub i_model: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct RefinementOutput {
    /// Final density in e⁻/Å³ (cut out around the particle when requested).
    pub map: DensityMap,
    pub support: SupportMask,
    pub trace: ReconstructionTrace,
    pub fit: FitCurve,
    /// Factor that mapped measured intensities onto `ne²` at the first data shell.
    pub scale_factor: f64,
    /// Refinement steps executed, not counting the final pass.
    pub steps: usize,
    pub seed: u64,
}

impl RefinementOutput {
    pub fn final_chi2(&self) -> f64 {
        self.trace.chi2().last().copied().unwrap_or(f64::NAN)
    }

    pub fn final_rg(&self) -> f64 {
        self.trace.rg().last().copied().unwrap_or(f64::NAN)
    }

    pub fn final_support_volume(&self) -> f64 {
        self.trace.support_volume().last().copied().unwrap_or(f64::NAN)
    }
}

/// Receives intermediate maps (in e⁻/Å³) while a run is in progress.
pub trait SnapshotSink {
    fn offer(&mut self, step: usize, map: &DensityMap) -> Result<(), EngineError>;
}

impl<F> SnapshotSink for F
where
    F: FnMut(usize, &DensityMap) -> Result<(), EngineError>,
{
    fn offer(&mut self, step: usize, map: &DensityMap) -> Result<(), EngineError> {
        self(step, map)
    }
}

/// Discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshots;

impl SnapshotSink for NoSnapshots {
    fn offer(&mut self, _step: usize, _map: &DensityMap) -> Result<(), EngineError> {
        Ok(())
    }
}
