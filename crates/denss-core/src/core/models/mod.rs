//! Data models shared by the reconstruction engine and the averaging pipeline.
//!
//! - [`curve::ScatteringCurve`] is the validated, immutable experimental input.
//! - [`density::DensityMap`] and [`density::SupportMask`] are the cubic grids every
//!   stage of the engine consumes and produces.
//! - [`transform::RigidTransform`] describes a rotation about the grid center followed by a
//!   translation, in grid units.

pub mod curve;
pub mod density;
pub mod transform;
