//! # Engine Module
//!
//! This module implements the computational core of DENSS: iterative density
//! refinement against a scattering profile, rigid-body alignment of density maps,
//! enantiomer resolution, ensemble averaging and Fourier shell correlation.
//!
//! ## Overview
//!
//! A reconstruction alternates between two projections. The reciprocal-space
//! projection rescales the Fourier amplitudes of the current density so that their
//! shell averages match the measured curve; the real-space projection applies the
//! support, positivity, density bounds, symmetry, recentering, shrinkwrap and
//! connectivity constraints. Independent runs from different random starts are then
//! aligned, their handedness resolved and the survivors averaged.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Reconstruction, alignment and averaging parameters
//! - **Curve Preparation** ([`curve_prep`]) - Mapping a measured profile onto the q shells of a run
//! - **Refinement** ([`refinement`]) - The projection loop, its constraints and per-step trace
//! - **Alignment** ([`alignment`]) - Overlap scoring, coarse search, bounded local optimization
//! - **Enantiomers** ([`enantiomer`]) - Mirror-image generation and selection
//! - **Averaging** ([`averaging`]) - Binary reference building, outlier rejection, final average
//! - **Resolution** ([`fsc`]) - Fourier shell correlation and resolution estimates
//! - **Execution** ([`pool`], [`cancel`], [`progress`]) - Worker pool, cooperative abort, progress events
//! - **Error Handling** ([`error`]) - Engine-specific error types
//!
//! ## Key Capabilities
//!
//! - **Deterministic runs** from an explicit seed
//! - **Parallel execution** of independent runs and pairwise alignments
//! - **Cooperative cancellation** checked before every refinement step and alignment candidate
//! - **Structured progress** events for terminal or embedding front ends

pub mod alignment;
pub mod averaging;
pub mod cancel;
pub mod config;
pub mod curve_prep;
pub mod enantiomer;
pub mod error;
pub mod fsc;
pub mod pool;
pub mod progress;
pub mod refinement;
