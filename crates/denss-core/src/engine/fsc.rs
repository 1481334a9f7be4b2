use super::error::EngineError;
use crate::core::fft::Fft3;
use crate::core::grid::{FrequencyScale, QShells};
use crate::core::models::density::DensityMap;
use ndarray::Zip;

/// Fourier shell correlation as a function of spatial frequency (1/Å).
#[derive(Debug, Clone, PartialEq)]
pub struct FscCurve {
    q: Vec<f64>,
    correlation: Vec<f64>,
}

impl FscCurve {
    pub fn new(q: Vec<f64>, correlation: Vec<f64>) -> Self {
        Self { q, correlation }
    }

    pub fn q(&self) -> &[f64] {
        &self.q
    }

    pub fn correlation(&self) -> &[f64] {
        &self.correlation
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Element-wise mean of curves computed on the same shells.
    pub fn mean(curves: &[FscCurve]) -> Option<FscCurve> {
        let first = curves.first()?;
        let mut correlation = vec![0.0; first.len()];
        for curve in curves {
            if curve.len() != first.len() {
                return None;
            }
            for (acc, value) in correlation.iter_mut().zip(&curve.correlation) {
                *acc += value;
            }
        }
        let count = curves.len() as f64;
        correlation.iter_mut().for_each(|v| *v /= count);
        Some(FscCurve::new(first.q.clone(), correlation))
    }

    /// Spatial frequency where the curve first drops below `threshold`, linearly
    /// interpolated between the neighbouring shells; the last frequency when it never
    /// does.
    pub fn crossing(&self, threshold: f64) -> Option<f64> {
        let last = *self.q.last()?;
        let Some(index) = self.correlation.iter().position(|&c| c < threshold) else {
            return Some(last);
        };
        if index == 0 {
            return self.q.get(1).copied().or(Some(last));
        }
        let (q0, q1) = (self.q[index - 1], self.q[index]);
        let (c0, c1) = (self.correlation[index - 1], self.correlation[index]);
        if c1 == c0 {
            return Some(q1);
        }
        Some(q0 + (threshold - c0) * (q1 - q0) / (c1 - c0))
    }

    /// `1 / crossing(threshold)` in Å.
    pub fn resolution(&self, threshold: f64) -> f64 {
        match self.crossing(threshold) {
            Some(q) if q > 0.0 => 1.0 / q,
            _ => f64::INFINITY,
        }
    }
}

/// Computes FSC curves between maps sharing one grid, reusing the FFT plan and shell
/// labeling.
#[derive(Debug, Clone)]
pub struct FscCalculator {
    n: usize,
    fft: Fft3,
    shells: QShells,
}

impl FscCalculator {
    pub fn new(n: usize, side: f64) -> Result<Self, EngineError> {
        Ok(Self {
            n,
            fft: Fft3::new(n),
            shells: QShells::new(n, side, FrequencyScale::Spatial)?,
        })
    }

    pub fn for_map(map: &DensityMap) -> Result<Self, EngineError> {
        Self::new(map.n(), map.side())
    }

    /// Per shell `Σ Re(F₁·F₂*) / sqrt(Σ|F₁|² · Σ|F₂|²)`, keeping shells whose lower edge
    /// lies below the largest single-axis frequency.
    pub fn compute(&self, a: &DensityMap, b: &DensityMap) -> Result<FscCurve, EngineError> {
        for map in [a, b] {
            if map.n() != self.n {
                return Err(EngineError::GridMismatch {
                    expected: self.n,
                    found: map.n(),
                });
            }
        }
        let fa = self.fft.forward_real(a.data());
        let fb = self.fft.forward_real(b.data());

        let mut cross = vec![0.0; self.shells.len()];
        let mut power_a = vec![0.0; self.shells.len()];
        let mut power_b = vec![0.0; self.shells.len()];
        Zip::from(self.shells.labels())
            .and(&fa)
            .and(&fb)
            .for_each(|&label, x, y| {
                cross[label] += (x * y.conj()).re;
                power_a[label] += x.norm_sqr();
                power_b[label] += y.norm_sqr();
            });

        let limit = self.shells.max_axis_frequency();
        let (q, correlation) = self
            .shells
            .edges()
            .iter()
            .enumerate()
            .filter(|&(_, &edge)| edge < limit)
            .map(|(bin, &edge)| {
                let denominator = (power_a[bin] * power_b[bin]).sqrt();
                let value = if denominator > 0.0 {
                    cross[bin] / denominator
                } else {
                    0.0
                };
                (edge, value)
            })
            .unzip();
        Ok(FscCurve::new(q, correlation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_map(n: usize, seed: u64) -> DensityMap {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let data = Array3::from_shape_fn((n, n, n), |_| rng.r#gen::<f64>());
        DensityMap::new(data, 40.0).unwrap()
    }

    #[test]
    fn map_correlates_perfectly_with_itself() {
        let map = random_map(10, 3);
        let calculator = FscCalculator::for_map(&map).unwrap();
        let curve = calculator.compute(&map, &map).unwrap();
        assert!(!curve.is_empty());
        for &c in curve.correlation() {
            assert!((c - 1.0).abs() < 1e-10);
        }
        // No crossing: resolution is the inverse of the last frequency.
        let last = *curve.q().last().unwrap();
        assert!((curve.resolution(0.5) - 1.0 / last).abs() < 1e-12);
    }

    #[test]
    fn kept_shells_stay_below_axis_nyquist() {
        let map = random_map(8, 1);
        let calculator = FscCalculator::for_map(&map).unwrap();
        let curve = calculator.compute(&map, &random_map(8, 2)).unwrap();
        // Axis frequencies of an 8-point grid over 40 Å reach 3/40.
        assert!(curve.q().iter().all(|&q| q < 3.0 / 40.0));
        assert_eq!(curve.q()[0], 0.0);
    }

    #[test]
    fn crossing_is_linearly_interpolated() {
        let curve = FscCurve::new(vec![0.0, 0.1, 0.2, 0.3], vec![1.0, 0.8, 0.4, 0.1]);
        let q = curve.crossing(0.5).unwrap();
        assert!((q - 0.175).abs() < 1e-12);
        assert!((curve.resolution(0.5) - 1.0 / 0.175).abs() < 1e-9);
    }

    #[test]
    fn mean_of_curves_averages_each_shell() {
        let a = FscCurve::new(vec![0.0, 0.1], vec![1.0, 0.6]);
        let b = FscCurve::new(vec![0.0, 0.1], vec![1.0, 0.2]);
        let mean = FscCurve::mean(&[a, b]).unwrap();
        assert_eq!(mean.correlation(), &[1.0, 0.4]);
        assert!(FscCurve::mean(&[]).is_none());
    }

    #[test]
    fn grid_mismatch_is_reported() {
        let calculator = FscCalculator::new(8, 40.0).unwrap();
        let result = calculator.compute(&random_map(8, 1), &random_map(10, 1));
        assert!(matches!(result, Err(EngineError::GridMismatch { expected: 8, found: 10 })));
    }
}
