use thiserror::Error;

use super::config::ConfigError;
use crate::core::grid::GridError;
use crate::core::io::MapFileError;
use crate::core::models::curve::CurveError;
use crate::core::models::density::MapShapeError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Invalid scattering curve: {source}")]
    Curve {
        #[from]
        source: CurveError,
    },

    #[error("Invalid grid: {source}")]
    Grid {
        #[from]
        source: GridError,
    },

    #[error("Invalid density map: {source}")]
    Shape {
        #[from]
        source: MapShapeError,
    },

    #[error("Map file error: {source}")]
    MapFile {
        #[from]
        source: MapFileError,
    },

    #[error(
        "No reciprocal-space shell center lies inside the measured q range [{q_min}, {q_max}]"
    )]
    NoDataShells { q_min: f64, q_max: f64 },

    #[error("Intensity at the first data shell (q = {q}) must be positive to set the scale, got {value}")]
    NonPositiveScale { q: f64, value: f64 },

    #[error("Map grids differ: expected {expected}³ voxels, found {found}³")]
    GridMismatch { expected: usize, found: usize },

    #[error("Ensemble is empty: {0}")]
    EmptyEnsemble(&'static str),

    #[error("Worker task '{task}' failed: {reason}")]
    WorkerFailed { task: String, reason: String },

    #[error("Internal logic error: {0}")]
    Internal(String),
}
