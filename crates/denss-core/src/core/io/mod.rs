//! Provides input/output for density maps and tabular reconstruction outputs.
//!
//! Map formats implement the [`traits::MapFile`] trait so callers can read and write
//! MRC and XPLOR grids through one interface. Plain-text tables (fit curves, per-step
//! statistics, FSC curves) and whitespace-separated scattering profiles live in [`text`].

pub mod mrc;
pub mod text;
pub mod traits;
pub mod xplor;

use crate::core::models::curve::CurveError;
use crate::core::models::density::MapShapeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Unsupported MRC data mode {0} (only mode 2, 32-bit float, is supported)")]
    UnsupportedMode(i32),
    #[error("File ended early: expected {expected} values, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Invalid grid: {0}")]
    Shape(#[from] MapShapeError),
    #[error("Invalid scattering profile: {0}")]
    Curve(#[from] CurveError),
}

/// Formats `value` the way C's `%.{precision}e` does: a mantissa with `precision`
/// decimals and an exponent with an explicit sign and at least two digits.
pub fn scientific(value: f64, precision: usize, uppercase: bool) -> String {
    if !value.is_finite() {
        return if value.is_nan() {
            "nan".to_string()
        } else if value > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        };
    }
    let raw = format!("{:.*e}", precision, value);
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let marker = if uppercase { 'E' } else { 'e' };
    format!("{mantissa}{marker}{sign}{:02}", exponent.abs())
}

/// Like [`scientific`] with a leading space in place of the sign for non-negative values
/// (C's `% .{precision}E`).
pub fn scientific_signed(value: f64, precision: usize, uppercase: bool) -> String {
    let body = scientific(value, precision, uppercase);
    if body.starts_with('-') {
        body
    } else {
        format!(" {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scientific_matches_c_style_exponents() {
        assert_eq!(scientific(0.012345, 5, false), "1.23450e-02");
        assert_eq!(scientific(12345.0, 3, true), "1.234E+04");
        assert_eq!(scientific(0.0, 5, false), "0.00000e+00");
        assert_eq!(scientific(-2.5e-120, 2, false), "-2.50e-120");
    }

    #[test]
    fn signed_variant_pads_positive_values() {
        assert_eq!(scientific_signed(1.0, 5, true), " 1.00000E+00");
        assert_eq!(scientific_signed(-1.0, 5, true), "-1.00000E+00");
    }
}
