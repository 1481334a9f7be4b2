//! # DENSS Core Library
//!
//! Electron density reconstruction from one-dimensional solution scattering profiles,
//! together with the rigid-body alignment, enantiomer resolution and ensemble averaging
//! needed to turn a population of independent reconstructions into a single model.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`ScatteringCurve`, `DensityMap`,
//!   `SupportMask`, `RigidTransform`), the real/reciprocal grid geometry, the 3D FFT, numeric
//!   utilities (interpolation, filtering, labeling) and map file I/O.
//!
//! - **[`engine`]: The Logic Core.** The iterative refinement loop, map alignment, enantiomer
//!   selection, ensemble averaging and Fourier shell correlation, plus the configuration,
//!   progress reporting, cancellation and task pool that drive them.
//!
//! - **[`workflows`]: The Public API.** Complete procedures that tie `engine` and `core`
//!   together: a reconstruction run that writes its maps, fit and statistics; batch runs on
//!   the task pool; averaging of a population; alignment of maps to a reference.

pub mod core;
pub mod engine;
pub mod workflows;
