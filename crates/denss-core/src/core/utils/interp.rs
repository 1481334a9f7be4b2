use nalgebra::{DMatrix, DVector};

/// Piecewise-linear interpolation of `(xp, fp)` at `x`, clamping to the end values
/// outside `[xp[0], xp[last]]`. `xp` must be increasing.
pub fn linear(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    debug_assert_eq!(xp.len(), fp.len());
    let last = xp.len() - 1;
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }
    let upper = xp.partition_point(|&v| v <= x).min(last);
    let lower = upper - 1;
    let span = xp[upper] - xp[lower];
    if span == 0.0 {
        return fp[lower];
    }
    let t = (x - xp[lower]) / span;
    fp[lower] + t * (fp[upper] - fp[lower])
}

pub fn linear_many(x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    x.iter().map(|&xi| linear(xi, xp, fp)).collect()
}

/// Interpolating cubic spline with not-a-knot end conditions.
///
/// Evaluation outside the knot range extends the first/last cubic piece, so the
/// spline extrapolates smoothly.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    second_derivatives: Vec<f64>,
}

impl CubicSpline {
    /// Returns `None` when fewer than two knots are given, the knots are not strictly
    /// increasing, or the moment system is singular.
    pub fn not_a_knot(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = x.len();
        if n < 2 || n != y.len() || x.windows(2).any(|w| w[1] <= w[0]) {
            return None;
        }
        if y.iter().any(|v| !v.is_finite()) {
            return None;
        }
        if n == 2 {
            return Some(Self {
                x: x.to_vec(),
                y: y.to_vec(),
                second_derivatives: vec![0.0; 2],
            });
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let mut a = DMatrix::<f64>::zeros(n, n);
        let mut b = DVector::<f64>::zeros(n);

        for i in 1..n - 1 {
            a[(i, i - 1)] = h[i - 1];
            a[(i, i)] = 2.0 * (h[i - 1] + h[i]);
            a[(i, i + 1)] = h[i];
            b[i] = 6.0 * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
        }

        if n == 3 {
            // A single parabola through three points.
            a[(0, 0)] = 1.0;
            a[(0, 1)] = -1.0;
            a[(2, 1)] = 1.0;
            a[(2, 2)] = -1.0;
        } else {
            a[(0, 0)] = h[1];
            a[(0, 1)] = -(h[0] + h[1]);
            a[(0, 2)] = h[0];
            a[(n - 1, n - 3)] = h[n - 2];
            a[(n - 1, n - 2)] = -(h[n - 3] + h[n - 2]);
            a[(n - 1, n - 1)] = h[n - 3];
        }

        let moments = a.lu().solve(&b)?;
        if moments.iter().any(|m| !m.is_finite()) {
            return None;
        }

        Some(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            second_derivatives: moments.iter().copied().collect(),
        })
    }

    pub fn evaluate(&self, xv: f64) -> f64 {
        let n = self.x.len();
        let seg = self
            .x
            .partition_point(|&v| v <= xv)
            .saturating_sub(1)
            .min(n - 2);
        let (x0, x1) = (self.x[seg], self.x[seg + 1]);
        let (y0, y1) = (self.y[seg], self.y[seg + 1]);
        let (m0, m1) = (self.second_derivatives[seg], self.second_derivatives[seg + 1]);
        let h = x1 - x0;
        let a = x1 - xv;
        let b = xv - x0;
        m0 * a.powi(3) / (6.0 * h)
            + m1 * b.powi(3) / (6.0 * h)
            + (y0 / h - m0 * h / 6.0) * a
            + (y1 / h - m1 * h / 6.0) * b
    }

    pub fn evaluate_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&xv| self.evaluate(xv)).collect()
    }
}
