use nalgebra::{SMatrix, SVector};
use std::cell::Cell;

pub type Params = SVector<f64, 6>;
type Matrix6 = SMatrix<f64, 6, 6>;

const ARMIJO: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 20;
const PROJECTED_GRADIENT_TOLERANCE: f64 = 1e-5;
/// Relative objective reduction below `FACTR · ε` counts as converged.
const FACTR: f64 = 0.1;

/// Box-constrained quasi-Newton minimizer over six parameters.
///
/// Projected BFGS with a forward finite-difference gradient: the search direction is the
/// inverse-Hessian step with components pushing against an active bound removed, a
/// backtracking Armijo line search keeps iterates inside the box, and the inverse Hessian
/// is reset whenever the curvature condition fails.
#[derive(Debug, Clone)]
pub struct BoundedBfgs {
    pub lower: Params,
    pub upper: Params,
    pub step: f64,
    pub max_iterations: usize,
    pub max_evaluations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Params,
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

impl BoundedBfgs {
    pub fn minimize<F>(&self, mut objective: F, start: Params) -> Minimum
    where
        F: FnMut(&Params) -> f64,
    {
        let evaluations = Cell::new(0usize);
        let mut eval = |x: &Params| {
            evaluations.set(evaluations.get() + 1);
            objective(x)
        };

        let mut x = self.project(&start);
        let mut fx = eval(&x);
        let mut g = self.gradient(&mut eval, &x, fx);
        let mut h = Matrix6::identity();
        let mut fresh_hessian = true;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            if self.projected_gradient_norm(&x, &g) < PROJECTED_GRADIENT_TOLERANCE {
                converged = true;
                break;
            }

            let mut d = self.feasible_direction(&x, &(-(h * g)));
            if g.dot(&d) >= 0.0 {
                h = Matrix6::identity();
                fresh_hessian = true;
                d = self.feasible_direction(&x, &(-g));
                if g.dot(&d) >= 0.0 {
                    converged = true;
                    break;
                }
            }

            let mut alpha = if fresh_hessian {
                (1.0 / d.norm()).min(1.0)
            } else {
                1.0
            };
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let candidate = self.project(&(x + d * alpha));
                let f_candidate = eval(&candidate);
                if f_candidate <= fx + ARMIJO * g.dot(&(candidate - x)) {
                    accepted = Some((candidate, f_candidate));
                    break;
                }
                alpha *= 0.5;
                if evaluations.get() >= self.max_evaluations {
                    break;
                }
            }
            iterations += 1;

            let Some((x_new, f_new)) = accepted else {
                break;
            };
            let g_new = self.gradient(&mut eval, &x_new, f_new);

            let s = x_new - x;
            let y = g_new - g;
            let sy = s.dot(&y);
            if sy > 1e-12 {
                let rho = 1.0 / sy;
                let identity = Matrix6::identity();
                let left = identity - s * y.transpose() * rho;
                let right = identity - y * s.transpose() * rho;
                h = left * h * right + s * s.transpose() * rho;
                fresh_hessian = false;
            } else {
                h = Matrix6::identity();
                fresh_hessian = true;
            }

            let reduction = fx - f_new;
            let scale = fx.abs().max(f_new.abs()).max(1.0);
            x = x_new;
            fx = f_new;
            g = g_new;

            if reduction <= FACTR * f64::EPSILON * scale {
                converged = true;
                break;
            }
            if evaluations.get() >= self.max_evaluations {
                break;
            }
        }

        Minimum {
            x,
            value: fx,
            iterations,
            evaluations: evaluations.get(),
            converged,
        }
    }

    fn project(&self, x: &Params) -> Params {
        Params::from_fn(|i, _| x[i].clamp(self.lower[i], self.upper[i]))
    }

    /// Forward differences, switching to backward differences at the upper bound.
    fn gradient<F>(&self, eval: &mut F, x: &Params, fx: f64) -> Params
    where
        F: FnMut(&Params) -> f64,
    {
        let mut g = Params::zeros();
        for i in 0..6 {
            let mut probe = *x;
            let h = if x[i] + self.step <= self.upper[i] {
                self.step
            } else {
                -self.step
            };
            probe[i] += h;
            g[i] = (eval(&probe) - fx) / h;
        }
        g
    }

    fn projected_gradient_norm(&self, x: &Params, g: &Params) -> f64 {
        (0..6)
            .map(|i| ((x[i] - g[i]).clamp(self.lower[i], self.upper[i]) - x[i]).abs())
            .fold(0.0, f64::max)
    }

    /// Drops components that would leave the box from a variable sitting on its bound.
    fn feasible_direction(&self, x: &Params, d: &Params) -> Params {
        Params::from_fn(|i, _| {
            let at_lower = x[i] <= self.lower[i] && d[i] < 0.0;
            let at_upper = x[i] >= self.upper[i] && d[i] > 0.0;
            if at_lower || at_upper { 0.0 } else { d[i] }
        })
    }
}
