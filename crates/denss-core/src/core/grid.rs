use ndarray::Array3;
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum GridError {
    #[error("Box side must be positive and finite, got {0}")]
    InvalidSide(f64),
    #[error("Voxel size must be positive and finite, got {0}")]
    InvalidVoxelSize(f64),
    #[error("Grid must contain at least 2 voxels per axis, got {0}")]
    TooSmall(usize),
}

/// Real-space sampling of a cubic box of `side` Å with `n` (even) voxels per axis.
#[derive(Debug, Clone)]
pub struct RealSpaceGrid {
    n: usize,
    side: f64,
    coordinates: Vec<f64>,
    radius: Array3<f64>,
}

impl RealSpaceGrid {
    /// Chooses `n = round(side / voxel_size)`, bumped to the next even number.
    pub fn from_voxel_size(side: f64, voxel_size: f64) -> Result<Self, GridError> {
        if !(side.is_finite() && side > 0.0) {
            return Err(GridError::InvalidSide(side));
        }
        if !(voxel_size.is_finite() && voxel_size > 0.0) {
            return Err(GridError::InvalidVoxelSize(voxel_size));
        }
        let mut n = (side / voxel_size).round().max(2.0) as usize;
        if n % 2 == 1 {
            n += 1;
        }
        Self::with_points(n, side)
    }

    pub fn with_points(n: usize, side: f64) -> Result<Self, GridError> {
        if !(side.is_finite() && side > 0.0) {
            return Err(GridError::InvalidSide(side));
        }
        if n < 2 {
            return Err(GridError::TooSmall(n));
        }
        let coordinates = linspace(-side / 2.0, side / 2.0, n);
        let radius = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            (coordinates[i].powi(2) + coordinates[j].powi(2) + coordinates[k].powi(2)).sqrt()
        });
        Ok(Self {
            n,
            side,
            coordinates,
            radius,
        })
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn side(&self) -> f64 {
        self.side
    }

    #[inline]
    pub fn voxel_size(&self) -> f64 {
        self.side / self.n as f64
    }

    #[inline]
    pub fn voxel_volume(&self) -> f64 {
        self.voxel_size().powi(3)
    }

    pub fn volume(&self) -> f64 {
        self.side.powi(3)
    }

    /// Voxel coordinates along one axis, `linspace(-side/2, side/2, n)`.
    pub fn coordinates(&self) -> &[f64] {
        &self.coordinates
    }

    /// Distance of every voxel from the box origin, in Å.
    pub fn radius(&self) -> &Array3<f64> {
        &self.radius
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Signed FFT sample frequencies `fftfreq(n) * n` (integer cycles per box).
pub fn fft_frequencies(n: usize) -> Vec<f64> {
    let half = n.div_ceil(2);
    (0..n)
        .map(|i| {
            if i < half {
                i as f64
            } else {
                i as f64 - n as f64
            }
        })
        .collect()
}

/// Unit of the reciprocal-space magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyScale {
    /// Momentum transfer `q = 2π·f` in Å⁻¹ (used for scattering data).
    Angular,
    /// Plain spatial frequency `f` in Å⁻¹ (used for Fourier shell correlation).
    Spatial,
}

impl FrequencyScale {
    fn factor(self) -> f64 {
        match self {
            FrequencyScale::Angular => 2.0 * PI,
            FrequencyScale::Spatial => 1.0,
        }
    }
}

/// Radial binning of the reciprocal-space grid into concentric shells of width `step`.
///
/// Shell `b` covers `[b·step, (b+1)·step)`. Every voxel of the FFT grid carries the index
/// of its shell; the labeling is built once and shared read-only.
#[derive(Debug, Clone)]
pub struct QShells {
    step: f64,
    edges: Vec<f64>,
    centers: Vec<f64>,
    labels: Array3<usize>,
    counts: Vec<usize>,
    max_axis_frequency: f64,
}

impl QShells {
    pub fn new(n: usize, side: f64, scale: FrequencyScale) -> Result<Self, GridError> {
        if !(side.is_finite() && side > 0.0) {
            return Err(GridError::InvalidSide(side));
        }
        if n < 2 {
            return Err(GridError::TooSmall(n));
        }
        let df = scale.factor() / side;
        let axis: Vec<f64> = fft_frequencies(n).into_iter().map(|f| f * df).collect();
        let max_axis_frequency = axis.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let magnitude = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            (axis[i].powi(2) + axis[j].powi(2) + axis[k].powi(2)).sqrt()
        });
        let q_max = magnitude.iter().copied().fold(0.0, f64::max);
        let step = magnitude
            .iter()
            .copied()
            .filter(|&q| q > 0.0)
            .fold(f64::INFINITY, f64::min);
        let nbins = (q_max / step) as usize;

        let edges: Vec<f64> = (0..=nbins).map(|i| i as f64 * step).collect();
        let centers: Vec<f64> = edges
            .iter()
            .enumerate()
            .map(|(i, &e)| if i == 0 { e } else { e + step / 2.0 })
            .collect();

        let mut counts = vec![0usize; edges.len()];
        let labels = magnitude.mapv(|q| {
            let label = edges.partition_point(|&e| e <= q).saturating_sub(1);
            counts[label] += 1;
            label
        });

        Ok(Self {
            step,
            edges,
            centers,
            labels,
            counts,
            max_axis_frequency,
        })
    }

    #[inline]
    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Lower shell edges `i·step`.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Shell centers: the edges shifted by half a step, except shell 0 which stays at 0.
    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    pub fn labels(&self) -> &Array3<usize> {
        &self.labels
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Largest positive frequency along a single axis.
    pub fn max_axis_frequency(&self) -> f64 {
        self.max_axis_frequency
    }

    /// Per-shell sum of `values`.
    pub fn sum<I>(&self, values: I) -> Vec<f64>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut sums = vec![0.0; self.len()];
        for (&label, value) in self.labels.iter().zip(values) {
            sums[label] += value;
        }
        sums
    }

    /// Per-shell mean of `values`; empty shells are `NaN`.
    pub fn mean<I>(&self, values: I) -> Vec<f64>
    where
        I: IntoIterator<Item = f64>,
    {
        self.sum(values)
            .into_iter()
            .zip(&self.counts)
            .map(|(s, &c)| if c == 0 { f64::NAN } else { s / c as f64 })
            .collect()
    }
}
