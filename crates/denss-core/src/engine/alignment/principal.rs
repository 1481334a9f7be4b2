use crate::core::models::density::DensityMap;
use crate::core::models::transform::RigidTransform;
use crate::core::utils::resample::{self, Interpolation};
use crate::core::utils::stats;
use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use ndarray::Array3;

const PRINCIPAL_AXIS_PASSES: usize = 3;

/// Map rotated onto its principal axes, with the rotation and centering shift of the
/// first pass.
#[derive(Debug, Clone)]
pub struct PrincipalAlignment {
    pub map: DensityMap,
    /// Rotation taking the centered map onto its principal axes.
    pub rotation: Matrix3<f64>,
    /// Shift, in voxels, that moved the center of mass onto the grid center.
    pub shift: Vector3<f64>,
}

/// Inertia tensor of `data` about its center of mass, with one grid length along an axis
/// counting as unit distance. An empty map has a zero tensor.
pub fn inertia_tensor(data: &Array3<f64>) -> Matrix3<f64> {
    let n = data.dim().0;
    let Some(com) = stats::center_of_mass(data) else {
        return Matrix3::zeros();
    };
    let scale = if n > 1 { 1.0 / (n - 1) as f64 } else { 0.0 };
    let (mut ixx, mut iyy, mut izz) = (0.0, 0.0, 0.0);
    let (mut ixy, mut iyz, mut ixz) = (0.0, 0.0, 0.0);
    for ((i, j, k), &rho) in data.indexed_iter() {
        let x = (i as f64 - com.x) * scale;
        let y = (j as f64 - com.y) * scale;
        let z = (k as f64 - com.z) * scale;
        ixx += (y * y + z * z) * rho;
        iyy += (x * x + z * z) * rho;
        izz += (x * x + y * y) * rho;
        ixy -= x * y * rho;
        iyz -= y * z * rho;
        ixz -= x * z * rho;
    }
    Matrix3::new(ixx, ixy, ixz, ixy, iyy, iyz, ixz, iyz, izz)
}

/// Rotation whose rows are the principal axes in order of increasing moment. The last
/// axis is negated when needed so that the result is a proper rotation.
pub fn principal_rotation(tensor: &Matrix3<f64>) -> Matrix3<f64> {
    let eigen = SymmetricEigen::new(*tensor);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    let mut rotation = Matrix3::zeros();
    for (row, &axis) in order.iter().enumerate() {
        rotation.set_row(row, &eigen.eigenvectors.column(axis).transpose());
    }
    if rotation.determinant() < 0.0 {
        let flipped = -rotation.row(2);
        rotation.set_row(2, &flipped);
    }
    rotation
}

/// Centers the map by its center of mass and rotates it onto its principal axes.
///
/// Rotation is repeated a few times to settle interpolation error; the electron count is
/// restored at the end. A map without mass is returned unchanged.
pub fn align_to_principal_axes(map: &DensityMap) -> PrincipalAlignment {
    let electrons = map.total();
    let center = map.grid_center();
    let Some(com) = map.center_of_mass() else {
        return PrincipalAlignment {
            map: map.clone(),
            rotation: Matrix3::identity(),
            shift: Vector3::zeros(),
        };
    };
    let shift = center - com;
    let mut data = resample::shift(map.data(), &shift, Interpolation::Cubic);
    let rotation = principal_rotation(&inertia_tensor(&data));

    for _ in 0..PRINCIPAL_AXIS_PASSES {
        let r = principal_rotation(&inertia_tensor(&data));
        let pivot = stats::center_of_mass(&data).unwrap_or(center);
        data = RigidTransform::new(r, Vector3::zeros()).resample(
            &data,
            &pivot,
            &center,
            Interpolation::Cubic,
        );
    }

    let mut aligned = map.clone();
    *aligned.data_mut() = data;
    aligned.renormalize_to(electrons);
    PrincipalAlignment {
        map: aligned,
        rotation,
        shift,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ellipsoid(n: usize, axes: [f64; 3], rotate: bool) -> DensityMap {
        let c = n as f64 / 2.0;
        let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let (mut x, mut y, z) = (i as f64 - c, j as f64 - c, k as f64 - c);
            if rotate {
                let (xr, yr) = ((x + y) / 2f64.sqrt(), (y - x) / 2f64.sqrt());
                x = xr;
                y = yr;
            }
            let d2 = (x / axes[0]).powi(2) + (y / axes[1]).powi(2) + (z / axes[2]).powi(2);
            (-d2 / 2.0).exp()
        });
        DensityMap::new(data, n as f64).unwrap()
    }

    #[test]
    fn principal_rotation_is_proper_and_orthonormal() {
        let tensor = Matrix3::new(2.0, 0.3, 0.1, 0.3, 1.0, -0.2, 0.1, -0.2, 3.0);
        let r = principal_rotation(&tensor);
        assert!((r * r.transpose() - Matrix3::identity()).norm() < 1e-10);
        assert!((r.determinant() - 1.0).abs() < 1e-10);
        let diagonal = r * tensor * r.transpose();
        assert!(diagonal[(0, 0)] <= diagonal[(1, 1)] && diagonal[(1, 1)] <= diagonal[(2, 2)]);
    }

    #[test]
    fn long_axis_ends_up_along_x() {
        let map = ellipsoid(32, [3.0, 1.6, 1.2], true);
        let aligned = align_to_principal_axes(&map);
        let tensor = inertia_tensor(aligned.map.data());
        // The smallest moment belongs to the longest axis, now x.
        assert!(tensor[(0, 0)] < tensor[(1, 1)]);
        assert!(tensor[(1, 1)] < tensor[(2, 2)]);
        assert!(tensor[(0, 1)].abs() < 0.05 * tensor[(0, 0)]);
        assert!((aligned.map.total() - map.total()).abs() < 1e-8 * map.total());
    }

    #[test]
    fn shift_moves_center_of_mass_to_grid_center() {
        let map = ellipsoid(16, [1.2, 1.2, 1.2], false);
        let data = resample::roll(map.data(), [2, -1, 0]);
        let moved = DensityMap::new(data, 16.0).unwrap();
        let aligned = align_to_principal_axes(&moved);
        assert!((aligned.shift - Vector3::new(-2.0, 1.0, 0.0)).norm() < 1e-2);
    }

    #[test]
    fn inertia_tensor_ignores_where_the_mass_sits() {
        let map = ellipsoid(32, [3.0, 1.6, 1.2], true);
        let moved = resample::roll(map.data(), [3, -2, 1]);
        let difference = inertia_tensor(map.data()) - inertia_tensor(&moved);
        assert!(difference.norm() < 1e-4 * inertia_tensor(map.data()).norm());
    }
}
