//! # Workflows Module
//!
//! This module provides the complete procedures a user runs: reconstructing a density
//! from a scattering profile, averaging a population of reconstructions and aligning
//! maps to a reference.
//!
//! ## Overview
//!
//! Workflows are the top-level entry points of the library. Each one drives the
//! [`engine`](crate::engine) through its phases, reports progress, honors the abort flag
//! and writes its results under a caller-chosen directory and file prefix. A
//! reconstruction logs into its own `{prefix}.log` through a scoped subscriber, so
//! concurrent runs never share a log file.
//!
//! ## Architecture
//!
//! - **Reconstruction** ([`reconstruct`]) - Single runs, seeded batches on the task pool,
//!   and refinement from an averaged map
//! - **Averaging** ([`average`]) - Reference building, outlier rejection, FSC resolution and
//!   the text summary
//! - **Alignment** ([`align`]) - Optional enantiomer selection and superposition onto a
//!   reference map
//! - **Output Layout** ([`output`]) - File naming, map writing and per-run log subscribers

pub mod align;
pub mod average;
pub mod output;
pub mod reconstruct;
