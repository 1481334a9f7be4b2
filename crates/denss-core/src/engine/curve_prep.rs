use super::error::EngineError;
use crate::core::grid::QShells;
use crate::core::models::curve::ScatteringCurve;
use crate::core::utils::interp;

/// A measured curve mapped onto the reciprocal-space shells of one run, scaled so that
/// the forward intensity equals `ne²`.
#[derive(Debug, Clone)]
pub struct PreparedCurve {
    /// Shell indices carrying data, ascending.
    data_bins: Vec<usize>,
    /// `true` for every shell listed in `data_bins`.
    is_data_bin: Vec<bool>,
    q_data: Vec<f64>,
    i_data: Vec<f64>,
    sigma_data: Vec<f64>,
    q: Vec<f64>,
    intensity: Vec<f64>,
    sigma: Vec<f64>,
    scale_factor: f64,
}

impl PreparedCurve {
    /// Interpolates the curve onto the shell centers inside the measured range and, with
    /// `extrapolate`, extends it to the remaining outer shells with a `q⁻⁴` tail anchored
    /// on the last measured point.
    pub fn new(
        curve: &ScatteringCurve,
        shells: &QShells,
        electrons: f64,
        extrapolate: bool,
    ) -> Result<Self, EngineError> {
        let centers = shells.centers();
        let (q_min, q_max) = (curve.q_min(), curve.q_max());

        let mut data_bins: Vec<usize> = centers
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c >= q_min && c <= q_max)
            .map(|(i, _)| i)
            .collect();
        if data_bins.is_empty() {
            return Err(EngineError::NoDataShells { q_min, q_max });
        }

        let mut q_data: Vec<f64> = data_bins.iter().map(|&b| centers[b]).collect();
        let mut i_data = interp::linear_many(&q_data, curve.q(), curve.intensity());

        if extrapolate {
            let last_bin = data_bins[data_bins.len() - 1];
            let anchor_q = centers[last_bin];
            let anchor_i = i_data[i_data.len() - 1];
            for (bin, &center) in centers.iter().enumerate().skip(last_bin + 1) {
                data_bins.push(bin);
                q_data.push(center);
                i_data.push(anchor_i * (anchor_q / center).powi(4));
            }
        }
        let mut sigma_data = interp::linear_many(&q_data, curve.q(), curve.sigma());

        let forward = i_data[0];
        if !(forward.is_finite() && forward > 0.0) {
            return Err(EngineError::NonPositiveScale {
                q: q_data[0],
                value: forward,
            });
        }
        let scale_factor = electrons * electrons / forward;

        i_data.iter_mut().for_each(|v| *v *= scale_factor);
        sigma_data.iter_mut().for_each(|v| *v *= scale_factor);
        let intensity = curve.intensity().iter().map(|v| v * scale_factor).collect();
        let sigma = curve.sigma().iter().map(|v| v * scale_factor).collect();

        let mut is_data_bin = vec![false; shells.len()];
        for &bin in &data_bins {
            is_data_bin[bin] = true;
        }

        Ok(Self {
            data_bins,
            is_data_bin,
            q_data,
            i_data,
            sigma_data,
            q: curve.q().to_vec(),
            intensity,
            sigma,
            scale_factor,
        })
    }

    pub fn data_bins(&self) -> &[usize] {
        &self.data_bins
    }

    pub fn is_data_bin(&self, bin: usize) -> bool {
        self.is_data_bin.get(bin).copied().unwrap_or(false)
    }

    pub fn q_data(&self) -> &[f64] {
        &self.q_data
    }

    /// Target shell intensities, in scaled units.
    pub fn i_data(&self) -> &[f64] {
        &self.i_data
    }

    pub fn sigma_data(&self) -> &[f64] {
        &self.sigma_data
    }

    /// Measured `q`, unchanged.
    pub fn q(&self) -> &[f64] {
        &self.q
    }

    /// Measured intensities, in scaled units.
    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    pub fn sigma(&self) -> &[f64] {
        &self.sigma
    }

    /// `ne² / I(first data shell)`; divide by it to return to measured units.
    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }
}
