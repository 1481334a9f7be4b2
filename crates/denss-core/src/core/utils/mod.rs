//! Numeric utilities over cubic 3D grids and 1D profiles.
//!
//! These mirror the small set of array operations the reconstruction and alignment
//! stages need: linear and cubic-spline interpolation, affine resampling with periodic
//! boundaries, separable Gaussian blurring, connected-component labeling and a few
//! summary statistics.

pub mod filter;
pub mod interp;
pub mod label;
pub mod resample;
pub mod stats;
