use crate::core::fft::Fft3;
use crate::core::grid::QShells;
use crate::core::utils::interp::CubicSpline;
use crate::engine::curve_prep::PreparedCurve;
use ndarray::{Array3, Zip};

/// Result of one reciprocal-space projection.
#[derive(Debug, Clone)]
pub struct Projection {
    /// Real part of the inverse transform of the rescaled amplitudes.
    pub density: Array3<f64>,
    /// Shell-averaged `|F|²` of the input density.
    pub shell_intensity: Vec<f64>,
    pub chi2: f64,
}

/// Forces the spherically averaged intensity of a density to match the prepared curve.
#[derive(Debug, Clone)]
pub struct ReciprocalProjector {
    fft: Fft3,
    shells: QShells,
    curve: PreparedCurve,
}

impl ReciprocalProjector {
    pub fn new(n: usize, shells: QShells, curve: PreparedCurve) -> Self {
        Self {
            fft: Fft3::new(n),
            shells,
            curve,
        }
    }

    pub fn shells(&self) -> &QShells {
        &self.shells
    }

    pub fn curve(&self) -> &PreparedCurve {
        &self.curve
    }

    /// Transforms `density`, scales every data shell by `sqrt(I_data / I_mean)` and
    /// transforms back.
    pub fn project(&self, density: &Array3<f64>) -> Projection {
        let mut spectrum = self.fft.forward_real(density);
        let shell_intensity = self.shells.mean(spectrum.iter().map(|f| f.norm_sqr()));
        let factors = self.scale_factors(&shell_intensity);

        Zip::from(&mut spectrum)
            .and(self.shells.labels())
            .for_each(|f, &label| *f *= factors[label]);
        let chi2 = self.chi2(&shell_intensity);

        Projection {
            density: self.fft.inverse_real(spectrum),
            shell_intensity,
            chi2,
        }
    }

    /// Per-shell amplitude factors; shells without data or with an undefined mean keep
    /// factor 1.
    pub fn scale_factors(&self, shell_intensity: &[f64]) -> Vec<f64> {
        let mut factors = vec![1.0; shell_intensity.len()];
        for (&bin, &target) in self.curve.data_bins().iter().zip(self.curve.i_data()) {
            let factor = (target / shell_intensity[bin]).sqrt();
            if factor.is_finite() {
                factors[bin] = factor;
            }
        }
        factors
    }

    /// Reduced χ² of a cubic spline through the shell intensities, evaluated at the
    /// measured `q`. Falls back to comparing data shells directly when no spline can be
    /// built.
    pub fn chi2(&self, shell_intensity: &[f64]) -> f64 {
        let (knots, values): (Vec<f64>, Vec<f64>) = self
            .shells
            .centers()
            .iter()
            .zip(shell_intensity)
            .filter(|&(_, v)| v.is_finite())
            .map(|(&q, &v)| (q, v))
            .unzip();

        let curve = &self.curve;
        match CubicSpline::not_a_knot(&knots, &values) {
            Some(spline) => {
                let sum: f64 = curve
                    .q()
                    .iter()
                    .zip(curve.intensity())
                    .zip(curve.sigma())
                    .map(|((&q, &i), &s)| ((spline.evaluate(q) - i) / s).powi(2))
                    .sum();
                sum / curve.q().len() as f64
            }
            None => {
                let sum: f64 = curve
                    .data_bins()
                    .iter()
                    .zip(curve.i_data())
                    .zip(curve.sigma_data())
                    .map(|((&bin, &i), &s)| ((shell_intensity[bin] - i) / s).powi(2))
                    .sum();
                sum / curve.data_bins().len() as f64
            }
        }
    }
}
