use crate::core::utils::stats;
use nalgebra::Vector3;
use ndarray::{Array3, s};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum MapShapeError {
    #[error("Density grid must be cubic, got {0}x{1}x{2}")]
    NotCubic(usize, usize, usize),
    #[error("Density grid must not be empty")]
    Empty,
    #[error("Box side must be positive and finite, got {0}")]
    InvalidSide(f64),
    #[error("Expected a grid of shape {expected:?}, got {found:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    #[error("Support shape {support:?} does not match map shape {map:?}")]
    SupportMismatch {
        map: (usize, usize, usize),
        support: (usize, usize, usize),
    },
}

/// A cubic electron-density grid of `n³` voxels spanning a box of `side` Å.
///
/// During refinement the values are electrons per voxel; maps leaving the engine are
/// in e⁻/Å³.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityMap {
    data: Array3<f64>,
    side: f64,
}

impl DensityMap {
    pub fn new(data: Array3<f64>, side: f64) -> Result<Self, MapShapeError> {
        let (nx, ny, nz) = data.dim();
        if nx == 0 {
            return Err(MapShapeError::Empty);
        }
        if nx != ny || ny != nz {
            return Err(MapShapeError::NotCubic(nx, ny, nz));
        }
        if !(side.is_finite() && side > 0.0) {
            return Err(MapShapeError::InvalidSide(side));
        }
        Ok(Self { data, side })
    }

    pub fn zeros(n: usize, side: f64) -> Result<Self, MapShapeError> {
        Self::new(Array3::zeros((n, n, n)), side)
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.data.dim().0
    }

    #[inline]
    pub fn side(&self) -> f64 {
        self.side
    }

    #[inline]
    pub fn voxel_size(&self) -> f64 {
        self.side / self.n() as f64
    }

    #[inline]
    pub fn voxel_volume(&self) -> f64 {
        self.voxel_size().powi(3)
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    pub fn into_data(self) -> Array3<f64> {
        self.data
    }

    /// Replaces the voxel values, keeping the box. The new array must have the same shape.
    pub fn with_data(&self, data: Array3<f64>) -> Result<Self, MapShapeError> {
        if data.dim() != self.data.dim() {
            return Err(MapShapeError::ShapeMismatch {
                expected: self.data.dim(),
                found: data.dim(),
            });
        }
        Ok(Self {
            data,
            side: self.side,
        })
    }

    pub fn total(&self) -> f64 {
        self.data.sum()
    }

    /// Geometric center of the grid in index units (`n / 2` on every axis).
    pub fn grid_center(&self) -> Vector3<f64> {
        let c = self.n() as f64 / 2.0;
        Vector3::new(c, c, c)
    }

    pub fn center_of_mass(&self) -> Option<Vector3<f64>> {
        stats::center_of_mass(&self.data)
    }

    /// Scales the map so that its voxel sum equals `target`. A map summing to zero is
    /// left untouched.
    pub fn renormalize_to(&mut self, target: f64) {
        let total = self.total();
        if total != 0.0 && total.is_finite() {
            let factor = target / total;
            self.data.mapv_inplace(|v| v * factor);
        }
    }

    /// Mirror image across the first (x) axis.
    pub fn flipped_x(&self) -> Self {
        Self {
            data: self.data.slice(s![..;-1, .., ..]).to_owned(),
            side: self.side,
        }
    }

    /// The `size³` sub-box starting at voxel `(start, start, start)`. Returns `None` when
    /// the window does not fit inside the grid.
    pub fn crop(&self, start: usize, size: usize) -> Option<Self> {
        if start + size > self.n() || size == 0 {
            return None;
        }
        let data = self
            .data
            .slice(s![start..start + size, start..start + size, start..start + size])
            .to_owned();
        Some(Self {
            data,
            side: self.voxel_size() * size as f64,
        })
    }

    /// Places this map in the middle of an `n³` zero grid (cropping symmetrically when it
    /// is larger than `n`). The voxel size is taken to be unchanged.
    pub fn embed_centered(&self, n: usize) -> Self {
        let m = self.n();
        let mut out = Array3::zeros((n, n, n));
        let dx = self.voxel_size();
        if m <= n {
            let offset = n / 2 - m / 2;
            out.slice_mut(s![offset..offset + m, offset..offset + m, offset..offset + m])
                .assign(&self.data);
        } else {
            let offset = m / 2 - n / 2;
            out.assign(&self.data.slice(s![
                offset..offset + n,
                offset..offset + n,
                offset..offset + n
            ]));
        }
        Self {
            data: out,
            side: dx * n as f64,
        }
    }

    pub fn mean_and_rms(&self) -> (f64, f64) {
        let count = self.data.len() as f64;
        let mean = self.total() / count;
        let variance = self.data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
        (mean, variance.sqrt())
    }

    pub fn min_max(&self) -> (f64, f64) {
        self.data
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Voxel-wise arithmetic mean of maps with identical shape and box.
    pub fn average<'a, I>(maps: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a DensityMap>,
    {
        let mut iter = maps.into_iter();
        let first = iter.next()?;
        let mut acc = first.data.clone();
        let mut count = 1usize;
        for map in iter {
            if map.data.dim() != acc.dim() {
                return None;
            }
            acc += &map.data;
            count += 1;
        }
        acc.mapv_inplace(|v| v / count as f64);
        Some(Self {
            data: acc,
            side: first.side,
        })
    }
}

/// Boolean mask marking the voxels where density is allowed to be non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportMask {
    mask: Array3<bool>,
}

impl SupportMask {
    pub fn full(n: usize) -> Self {
        Self {
            mask: Array3::from_elem((n, n, n), true),
        }
    }

    pub fn from_array(mask: Array3<bool>) -> Self {
        Self { mask }
    }

    pub fn as_array(&self) -> &Array3<bool> {
        &self.mask
    }

    pub fn as_array_mut(&mut self) -> &mut Array3<bool> {
        &mut self.mask
    }

    pub fn into_array(self) -> Array3<bool> {
        self.mask
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.mask.dim()
    }

    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    /// Support volume in Å³ for voxels of volume `voxel_volume`.
    pub fn volume(&self, voxel_volume: f64) -> f64 {
        self.count() as f64 * voxel_volume
    }

    pub fn crop(&self, start: usize, size: usize) -> Option<Self> {
        let n = self.mask.dim().0;
        if start + size > n || size == 0 {
            return None;
        }
        Some(Self {
            mask: self
                .mask
                .slice(s![start..start + size, start..start + size, start..start + size])
                .to_owned(),
        })
    }

    /// The mask as a 0/1 density map on a box of `side` Å.
    pub fn to_map(&self, side: f64) -> Result<DensityMap, MapShapeError> {
        DensityMap::new(self.mask.mapv(|v| if v { 1.0 } else { 0.0 }), side)
    }

    pub fn check_matches(&self, map: &DensityMap) -> Result<(), MapShapeError> {
        if self.mask.dim() != map.data().dim() {
            return Err(MapShapeError::SupportMismatch {
                map: map.data().dim(),
                support: self.mask.dim(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Array3<f64> {
        Array3::from_shape_fn((n, n, n), |(i, j, k)| (i * n * n + j * n + k) as f64)
    }

    #[test]
    fn non_cubic_grids_are_rejected() {
        let result = DensityMap::new(Array3::zeros((4, 4, 6)), 10.0);
        assert_eq!(result, Err(MapShapeError::NotCubic(4, 4, 6)));
    }

    #[test]
    fn voxel_geometry_follows_side_and_n() {
        let map = DensityMap::zeros(8, 40.0).unwrap();
        assert_eq!(map.voxel_size(), 5.0);
        assert_eq!(map.voxel_volume(), 125.0);
        assert_eq!(map.grid_center(), Vector3::new(4.0, 4.0, 4.0));
    }

    #[test]
    fn renormalize_conserves_target_electron_count() {
        let mut map = DensityMap::new(ramp(4), 4.0).unwrap();
        map.renormalize_to(10.0);
        assert!((map.total() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn renormalize_skips_zero_sum_maps() {
        let mut map = DensityMap::zeros(4, 4.0).unwrap();
        map.renormalize_to(10.0);
        assert_eq!(map.total(), 0.0);
    }

    #[test]
    fn x_flip_reverses_first_axis_only() {
        let map = DensityMap::new(ramp(4), 4.0).unwrap();
        let flipped = map.flipped_x();
        assert_eq!(flipped.data()[[0, 1, 2]], map.data()[[3, 1, 2]]);
        assert_eq!(flipped.flipped_x(), map);
    }

    #[test]
    fn crop_and_embed_keep_voxel_size() {
        let map = DensityMap::new(ramp(8), 16.0).unwrap();
        let cropped = map.crop(2, 4).unwrap();
        assert_eq!(cropped.n(), 4);
        assert_eq!(cropped.voxel_size(), 2.0);
        assert_eq!(cropped.data()[[0, 0, 0]], map.data()[[2, 2, 2]]);

        let embedded = cropped.embed_centered(8);
        assert_eq!(embedded.voxel_size(), 2.0);
        assert_eq!(embedded.data()[[2, 2, 2]], map.data()[[2, 2, 2]]);
        assert_eq!(embedded.data()[[0, 0, 0]], 0.0);
        assert!(map.crop(6, 4).is_none());
    }

    #[test]
    fn average_of_two_maps_is_voxelwise_mean() {
        let a = DensityMap::new(Array3::from_elem((2, 2, 2), 1.0), 2.0).unwrap();
        let b = DensityMap::new(Array3::from_elem((2, 2, 2), 3.0), 2.0).unwrap();
        let avg = DensityMap::average([&a, &b]).unwrap();
        assert!(avg.data().iter().all(|&v| v == 2.0));
    }

    #[test]
    fn support_volume_counts_true_voxels() {
        let mut support = SupportMask::full(4);
        support.as_array_mut()[[0, 0, 0]] = false;
        assert_eq!(support.count(), 63);
        assert_eq!(support.volume(2.0), 126.0);
        let map = support.to_map(4.0).unwrap();
        assert_eq!(map.total(), 63.0);
    }
}
