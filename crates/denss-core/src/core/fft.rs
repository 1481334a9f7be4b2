use ndarray::{Array3, Axis};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

/// Forward and inverse 3D complex FFT over a cubic `n³` grid.
///
/// Plans are created once and reused by every call, so a refinement run keeps a single
/// instance for its whole lifetime. The forward transform is unnormalized; the inverse
/// divides by `n³`, so `inverse(forward(x)) == x`.
#[derive(Clone)]
pub struct Fft3 {
    n: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for Fft3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fft3").field("n", &self.n).finish()
    }
}

impl Fft3 {
    pub fn new(n: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            n,
            forward: planner.plan_fft_forward(n),
            inverse: planner.plan_fft_inverse(n),
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn forward_real(&self, data: &Array3<f64>) -> Array3<Complex64> {
        let mut spectrum = data.mapv(|v| Complex64::new(v, 0.0));
        self.forward_in_place(&mut spectrum);
        spectrum
    }

    pub fn forward_in_place(&self, data: &mut Array3<Complex64>) {
        self.transform_axes(data, &self.forward);
    }

    pub fn inverse_in_place(&self, data: &mut Array3<Complex64>) {
        self.transform_axes(data, &self.inverse);
        let norm = 1.0 / (self.n * self.n * self.n) as f64;
        data.mapv_inplace(|v| v * norm);
    }

    /// Inverse transform keeping only the real part.
    pub fn inverse_real(&self, mut spectrum: Array3<Complex64>) -> Array3<f64> {
        self.inverse_in_place(&mut spectrum);
        spectrum.mapv(|v| v.re)
    }

    fn transform_axes(&self, data: &mut Array3<Complex64>, plan: &Arc<dyn Fft<f64>>) {
        debug_assert_eq!(data.dim(), (self.n, self.n, self.n));
        let mut buffer = vec![Complex64::new(0.0, 0.0); self.n];
        let mut scratch = vec![Complex64::new(0.0, 0.0); plan.get_inplace_scratch_len()];
        for axis in 0..3 {
            for mut lane in data.lanes_mut(Axis(axis)) {
                if let Some(slice) = lane.as_slice_mut() {
                    plan.process_with_scratch(slice, &mut scratch);
                    continue;
                }
                for (dst, src) in buffer.iter_mut().zip(lane.iter()) {
                    *dst = *src;
                }
                plan.process_with_scratch(&mut buffer, &mut scratch);
                for (dst, src) in lane.iter_mut().zip(buffer.iter()) {
                    *dst = *src;
                }
            }
        }
    }
}
