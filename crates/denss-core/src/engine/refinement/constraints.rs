//! Real-space constraints applied to the density after each reciprocal projection.
//!
//! All functions work on electrons-per-voxel grids in place, or return a new support.

use crate::core::models::density::SupportMask;
use crate::core::utils::filter::gaussian_blur;
use crate::core::utils::label::{feature_sums, label_components};
use crate::core::utils::resample::{self, Interpolation};
use crate::core::utils::stats;
use crate::engine::config::RecenterMode;
use nalgebra::Vector3;
use ndarray::{Array3, Zip};

fn rescale_to(rho: &mut Array3<f64>, target: f64) {
    let total = rho.sum();
    if total != 0.0 {
        let factor = target / total;
        rho.mapv_inplace(|v| v * factor);
    }
}

/// Zeroes every voxel outside the support.
pub fn apply_support(rho: &mut Array3<f64>, support: &SupportMask) {
    Zip::from(rho)
        .and(support.as_array())
        .for_each(|v, &inside| {
            if !inside {
                *v = 0.0;
            }
        });
}

/// Zeroes negative voxels and restores the previous electron count.
pub fn enforce_positivity(rho: &mut Array3<f64>) {
    let total = rho.sum();
    rho.mapv_inplace(|v| v.max(0.0));
    rescale_to(rho, total);
}

/// Zeroes voxels with `|ρ|` below `threshold`.
pub fn flatten_low_density(rho: &mut Array3<f64>, threshold: f64) {
    rho.mapv_inplace(|v| if v.abs() < threshold { 0.0 } else { v });
}

/// Raises voxels below `minimum` to it and restores the previous electron count.
pub fn clamp_minimum(rho: &mut Array3<f64>, minimum: f64) {
    let total = rho.sum();
    rho.mapv_inplace(|v| v.max(minimum));
    rescale_to(rho, total);
}

/// Lowers voxels above `maximum` to it and restores the previous electron count.
pub fn clamp_maximum(rho: &mut Array3<f64>, maximum: f64) {
    let total = rho.sum();
    rho.mapv_inplace(|v| v.min(maximum));
    rescale_to(rho, total);
}

/// Averages `fold` copies of the map rotated by multiples of `360° / fold` about `axis`.
pub fn symmetrize(rho: &Array3<f64>, fold: usize, axis: usize) -> Array3<f64> {
    let degrees = 360.0 / fold as f64;
    let mut sum = rho.clone();
    for copy in 1..fold {
        sum += &resample::rotate_about_axis(rho, axis, degrees * copy as f64, Interpolation::Cubic);
    }
    sum.mapv_inplace(|v| v / fold as f64);
    sum
}

/// Whole-voxel shift (truncated toward zero) that brings the center of mass or the
/// maximum onto the grid center.
pub fn recentering_shift(rho: &Array3<f64>, mode: RecenterMode) -> [isize; 3] {
    let n = rho.dim().0;
    let center = Vector3::repeat(n as f64 / 2.0);
    let position = match mode {
        RecenterMode::Com => match stats::center_of_mass(rho) {
            Some(com) => com,
            None => return [0, 0, 0],
        },
        RecenterMode::Max => stats::argmax_index(rho),
    };
    let shift = center - position;
    [shift.x as isize, shift.y as isize, shift.z as isize]
}

/// Rolls the density onto the grid center; returns the shift so a support can follow.
pub fn recenter(rho: &mut Array3<f64>, mode: RecenterMode) -> [isize; 3] {
    let shift = recentering_shift(rho, mode);
    if shift != [0, 0, 0] {
        *rho = resample::roll(rho, shift);
    }
    shift
}

/// Support from a blurred copy of the density: voxels at or above `fraction` of the
/// blurred maximum. With `absolute` the blur acts on `|ρ|`.
pub fn blurred_support(rho: &Array3<f64>, sigma: f64, fraction: f64, absolute: bool) -> SupportMask {
    let blurred = if absolute {
        gaussian_blur(&rho.mapv(f64::abs), sigma)
    } else {
        gaussian_blur(rho, sigma)
    };
    let max = blurred.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let threshold = fraction * max;
    SupportMask::from_array(blurred.mapv(|v| v >= threshold))
}

/// Keeps only the connected region (26-neighbourhood) of the blurred support that holds
/// the most electrons, zeroing the density everywhere else. Returns the number of regions
/// found.
pub fn keep_largest_component(rho: &mut Array3<f64>, sigma: f64, fraction: f64) -> usize {
    let support = blurred_support(rho, sigma, fraction, true);
    let (labels, count) = label_components(support.as_array());
    if count == 0 {
        return 0;
    }
    let sums = feature_sums(rho, &labels, count);
    let mut largest = 1;
    for feature in 2..=count {
        if sums[feature] > sums[largest] {
            largest = feature;
        }
    }
    Zip::from(rho).and(&labels).for_each(|v, &label| {
        if label != largest {
            *v = 0.0;
        }
    });
    count
}

/// Tapers density linearly to zero between `dmax` and `1.2·dmax` from the box origin and
/// removes everything beyond.
pub fn limit_dmax(rho: &mut Array3<f64>, radius: &Array3<f64>, dmax: f64) {
    let outer = 1.2 * dmax;
    Zip::from(rho).and(radius).for_each(|v, &r| {
        if r >= outer {
            *v = 0.0;
        } else if r > dmax {
            *v *= -r / (0.2 * dmax) + 6.0;
        }
    });
}

/// Radius of gyration over the support, corrected for the offset of the center of mass
/// from the grid center. Negative when the corrected second moment is negative.
pub fn radius_of_gyration(
    rho: &Array3<f64>,
    support: &SupportMask,
    radius: &Array3<f64>,
    voxel_size: f64,
) -> f64 {
    let n = rho.dim().0 as f64;
    let offset = stats::center_of_mass(rho)
        .map(|com| (com - Vector3::repeat(n / 2.0)) * voxel_size)
        .unwrap_or_else(Vector3::zeros);

    let mut weighted = 0.0;
    let mut total = 0.0;
    Zip::from(rho)
        .and(support.as_array())
        .and(radius)
        .for_each(|&v, &inside, &r| {
            if inside {
                weighted += r * r * v;
                total += v;
            }
        });
    let rg2 = weighted / total - offset.norm_squared();
    rg2.signum() * rg2.abs().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::RealSpaceGrid;

    fn ramp(n: usize) -> Array3<f64> {
        Array3::from_shape_fn((n, n, n), |(i, j, k)| i as f64 - j as f64 + 0.5 * k as f64)
    }

    #[test]
    fn positivity_conserves_electron_count() {
        let mut rho = ramp(6);
        let before = rho.sum();
        enforce_positivity(&mut rho);
        assert!(rho.iter().all(|&v| v >= 0.0));
        assert!((rho.sum() - before).abs() < 1e-9 * before.abs());
    }

    #[test]
    fn clamps_conserve_electron_count() {
        let mut rho = ramp(6).mapv(|v| v + 10.0);
        let before = rho.sum();
        clamp_maximum(&mut rho, 12.0);
        assert!((rho.sum() - before).abs() < 1e-9 * before);
        clamp_minimum(&mut rho, 9.0);
        assert!((rho.sum() - before).abs() < 1e-9 * before);
    }

    #[test]
    fn zero_sum_map_is_not_rescaled() {
        let mut rho = Array3::from_elem((2, 2, 2), -1.0);
        enforce_positivity(&mut rho);
        assert!(rho.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn support_and_flattening_zero_voxels() {
        let mut rho = Array3::from_elem((4, 4, 4), 0.5);
        rho[[1, 1, 1]] = 0.001;
        let mut mask = Array3::from_elem((4, 4, 4), true);
        mask[[0, 0, 0]] = false;
        apply_support(&mut rho, &SupportMask::from_array(mask));
        flatten_low_density(&mut rho, 0.01);
        assert_eq!(rho[[0, 0, 0]], 0.0);
        assert_eq!(rho[[1, 1, 1]], 0.0);
        assert_eq!(rho[[2, 2, 2]], 0.5);
    }

    #[test]
    fn recentering_rolls_a_point_to_the_grid_center() {
        let mut rho = Array3::zeros((8, 8, 8));
        rho[[1, 2, 7]] = 3.0;
        let shift = recenter(&mut rho, RecenterMode::Com);
        assert_eq!(shift, [3, 2, -3]);
        assert_eq!(rho[[4, 4, 4]], 3.0);
    }

    #[test]
    fn connectivity_keeps_the_heaviest_region() {
        let mut rho = Array3::zeros((12, 12, 12));
        rho[[2, 2, 2]] = 1.0;
        rho[[8, 8, 8]] = 5.0;
        rho[[8, 9, 8]] = 5.0;
        let regions = keep_largest_component(&mut rho, 0.5, 0.05);
        assert_eq!(regions, 2);
        assert_eq!(rho[[2, 2, 2]], 0.0);
        assert_eq!(rho[[8, 8, 8]], 5.0);
    }

    #[test]
    fn dmax_limit_tapers_and_cuts() {
        let grid = RealSpaceGrid::with_points(10, 90.0).unwrap();
        let mut rho = Array3::from_elem((10, 10, 10), 1.0);
        limit_dmax(&mut rho, grid.radius(), 30.0);
        Zip::from(&rho).and(grid.radius()).for_each(|&v, &r| {
            if r <= 30.0 {
                assert_eq!(v, 1.0);
            } else if r >= 36.0 {
                assert_eq!(v, 0.0);
            } else {
                assert!(v > 0.0 && v < 1.0);
            }
        });
    }

    #[test]
    fn symmetrized_map_is_invariant_under_the_rotation() {
        let n = 10;
        let rho = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let (x, y, z) = (i as f64 - 4.5, j as f64 - 4.5, k as f64 - 4.5);
            (-(x * x + (y - 2.0).powi(2) + z * z) / 3.0).exp()
        });
        let sym = symmetrize(&rho, 2, 0);
        let rotated = resample::rotate_about_axis(&sym, 0, 180.0, Interpolation::Cubic);
        let diff = (&sym - &rotated).mapv(f64::abs).sum() / sym.sum();
        assert!(diff < 1e-6, "relative difference {diff}");
    }

    #[test]
    fn radius_of_gyration_of_a_point_at_the_origin_vanishes() {
        let grid = RealSpaceGrid::with_points(9, 9.0).unwrap();
        let mut rho = Array3::zeros((9, 9, 9));
        rho[[4, 4, 4]] = 1.0;
        let support = SupportMask::full(9);
        // The mass sits half a voxel below the grid center on every axis, so the corrected
        // second moment is slightly negative.
        let rg = radius_of_gyration(&rho, &support, grid.radius(), grid.voxel_size());
        assert!((rg + 0.75f64.sqrt()).abs() < 1e-12);
    }
}
