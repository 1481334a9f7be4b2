use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum CurveError {
    #[error("Scattering curve must contain at least {min} points, found {found}")]
    TooFewPoints { min: usize, found: usize },
    #[error("Column lengths differ: q has {q}, I has {intensity}, sigma has {sigma}")]
    LengthMismatch {
        q: usize,
        intensity: usize,
        sigma: usize,
    },
    #[error("q values must be strictly increasing (violated at index {index})")]
    NonMonotonicQ { index: usize },
    #[error("sigma must be positive and finite (violated at index {index}: {value})")]
    InvalidSigma { index: usize, value: f64 },
    #[error("Non-finite value in column '{column}' at index {index}")]
    NonFinite { column: &'static str, index: usize },
}

const MIN_POINTS: usize = 2;

/// A measured one-dimensional scattering profile `I(q) ± sigma(q)`.
///
/// Construction validates the invariants the engine relies on: equal column lengths,
/// strictly increasing `q`, finite intensities and strictly positive errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ScatteringCurve {
    q: Vec<f64>,
    intensity: Vec<f64>,
    sigma: Vec<f64>,
}

impl ScatteringCurve {
    pub fn new(q: Vec<f64>, intensity: Vec<f64>, sigma: Vec<f64>) -> Result<Self, CurveError> {
        if q.len() != intensity.len() || q.len() != sigma.len() {
            return Err(CurveError::LengthMismatch {
                q: q.len(),
                intensity: intensity.len(),
                sigma: sigma.len(),
            });
        }
        if q.len() < MIN_POINTS {
            return Err(CurveError::TooFewPoints {
                min: MIN_POINTS,
                found: q.len(),
            });
        }

        for (index, ((&qi, &ii), &si)) in q.iter().zip(&intensity).zip(&sigma).enumerate() {
            if !qi.is_finite() {
                return Err(CurveError::NonFinite { column: "q", index });
            }
            if !ii.is_finite() {
                return Err(CurveError::NonFinite {
                    column: "I",
                    index,
                });
            }
            if !(si.is_finite() && si > 0.0) {
                return Err(CurveError::InvalidSigma { index, value: si });
            }
            if index > 0 && qi <= q[index - 1] {
                return Err(CurveError::NonMonotonicQ { index });
            }
        }

        Ok(Self {
            q,
            intensity,
            sigma,
        })
    }

    pub fn q(&self) -> &[f64] {
        &self.q
    }

    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    pub fn sigma(&self) -> &[f64] {
        &self.sigma
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    pub fn q_min(&self) -> f64 {
        self.q[0]
    }

    pub fn q_max(&self) -> f64 {
        self.q[self.q.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_curve_is_accepted() {
        let curve =
            ScatteringCurve::new(vec![0.01, 0.02, 0.03], vec![10.0, 8.0, 5.0], vec![0.1; 3])
                .unwrap();
        assert_eq!(curve.len(), 3);
        assert_eq!(curve.q_min(), 0.01);
        assert_eq!(curve.q_max(), 0.03);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let result = ScatteringCurve::new(vec![0.01, 0.02], vec![1.0], vec![0.1, 0.1]);
        assert!(matches!(result, Err(CurveError::LengthMismatch { .. })));
    }

    #[test]
    fn non_increasing_q_is_rejected() {
        let result =
            ScatteringCurve::new(vec![0.01, 0.03, 0.02], vec![1.0; 3], vec![0.1; 3]);
        assert_eq!(result, Err(CurveError::NonMonotonicQ { index: 2 }));
    }

    #[test]
    fn zero_sigma_is_rejected() {
        let result = ScatteringCurve::new(vec![0.01, 0.02], vec![1.0; 2], vec![0.1, 0.0]);
        assert!(matches!(
            result,
            Err(CurveError::InvalidSigma { index: 1, .. })
        ));
    }

    #[test]
    fn single_point_curve_is_rejected() {
        let result = ScatteringCurve::new(vec![0.01], vec![1.0], vec![0.1]);
        assert!(matches!(result, Err(CurveError::TooFewPoints { .. })));
    }
}
