//! # Core Module
//!
//! This module provides the fundamental building blocks for density reconstruction:
//! data models, grid geometry, Fourier transforms and numeric utilities.
//!
//! ## Overview
//!
//! Everything in `core` is stateless with respect to a reconstruction run. A run in the
//! [`engine`](crate::engine) builds a [`grid::RealSpaceGrid`] and a [`grid::QShells`]
//! labeling once, then repeatedly pushes density maps through [`fft::Fft3`] and the
//! constraint utilities found here.
//!
//! ## Architecture
//!
//! - **Data Models** ([`models`]) - Scattering curves, density maps, support masks, rigid transforms
//! - **Grid Geometry** ([`grid`]) - Real-space coordinates and reciprocal q-shell binning
//! - **Fourier Transforms** ([`fft`]) - Cached 3D complex FFT plans over cubic grids
//! - **File I/O** ([`io`]) - MRC and XPLOR maps, tabular text outputs
//! - **Numeric Utilities** ([`utils`]) - Interpolation, resampling, filtering, labeling, statistics

pub mod fft;
pub mod grid;
pub mod io;
pub mod models;
pub mod utils;
