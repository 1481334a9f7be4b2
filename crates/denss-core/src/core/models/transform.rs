use crate::core::utils::resample::{self, Interpolation};
use nalgebra::{Matrix3, Rotation3, Vector3};
use ndarray::Array3;

/// Rotation matrix `Rx(gamma) · Ry(beta) · Rz(alpha)` for counter-clockwise Euler angles
/// in radians.
pub fn euler_to_matrix(alpha: f64, beta: f64, gamma: f64) -> Matrix3<f64> {
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), alpha);
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), beta);
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), gamma);
    (rx * ry * rz).into_inner()
}

/// Recovers `(alpha, beta, gamma)` from a matrix built by [`euler_to_matrix`]. For
/// `|beta| = π/2` the decomposition is not unique and one valid triple is returned.
pub fn matrix_to_euler(m: &Matrix3<f64>) -> (f64, f64, f64) {
    let beta = m[(0, 2)].clamp(-1.0, 1.0).asin();
    let alpha = (-m[(0, 1)]).atan2(m[(0, 0)]);
    let gamma = (-m[(1, 2)]).atan2(m[(2, 2)]);
    (alpha, beta, gamma)
}

/// A rigid-body motion in grid coordinates.
///
/// A point `p` is sent to `R (p - pivot) + pivot + t`, where the pivot is supplied at
/// application time (usually the grid center). Translations are in voxels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Builds a transform from `[alpha, beta, gamma, tx, ty, tz]`.
    pub fn from_parameters(params: &[f64; 6]) -> Self {
        Self {
            rotation: euler_to_matrix(params[0], params[1], params[2]),
            translation: Vector3::new(params[3], params[4], params[5]),
        }
    }

    pub fn parameters(&self) -> [f64; 6] {
        let (alpha, beta, gamma) = matrix_to_euler(&self.rotation);
        [
            alpha,
            beta,
            gamma,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ]
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn inverse(&self) -> Self {
        let rt = self.rotation.transpose();
        Self {
            rotation: rt,
            translation: -(rt * self.translation),
        }
    }

    /// The transform applying `self` first and `next` second (same pivot).
    pub fn then(&self, next: &RigidTransform) -> Self {
        Self {
            rotation: next.rotation * self.rotation,
            translation: next.rotation * self.translation + next.translation,
        }
    }

    /// Resamples `data` so that the voxel at input position `source_pivot` lands on
    /// `target_pivot + t`, rotated by `R` about it. Periodic boundaries.
    pub fn resample(
        &self,
        data: &Array3<f64>,
        source_pivot: &Vector3<f64>,
        target_pivot: &Vector3<f64>,
        order: Interpolation,
    ) -> Array3<f64> {
        // input = Rᵀ (o - target_pivot - t) + source_pivot
        let rt = self.rotation.transpose();
        let offset = source_pivot - rt * (target_pivot + self.translation);
        resample::affine(data, &rt, &offset, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    const TOLERANCE: f64 = 1e-10;

    #[test]
    fn euler_round_trip_recovers_angles() {
        let (a, b, g) = (0.3, -0.7, 1.2);
        let m = euler_to_matrix(a, b, g);
        let (a2, b2, g2) = matrix_to_euler(&m);
        assert!((a - a2).abs() < TOLERANCE);
        assert!((b - b2).abs() < TOLERANCE);
        assert!((g - g2).abs() < TOLERANCE);
    }

    #[test]
    fn alpha_alone_rotates_counter_clockwise_about_z() {
        let m = euler_to_matrix(FRAC_PI_2, 0.0, 0.0);
        let v = m * Vector3::new(1.0, 0.0, 0.0);
        assert!((v - Vector3::new(0.0, 1.0, 0.0)).norm() < TOLERANCE);
    }

    #[test]
    fn transform_composed_with_inverse_is_identity() {
        let t = RigidTransform::from_parameters(&[0.4, 0.1, -0.9, 1.5, -2.0, 0.25]);
        let id = t.then(&t.inverse());
        assert!((id.rotation() - Matrix3::identity()).norm() < TOLERANCE);
        assert!(id.translation().norm() < TOLERANCE);
    }

    #[test]
    fn resampling_with_inverse_restores_a_smooth_map() {
        let n = 24;
        let center = Vector3::repeat(n as f64 / 2.0);
        let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            let d = Vector3::new(i as f64, j as f64, k as f64) - center;
            (-(d.x * d.x / 9.0 + d.y * d.y / 5.0 + d.z * d.z / 4.0) / 2.0).exp()
        });
        let t = RigidTransform::from_parameters(&[0.3, -0.2, 0.15, 1.0, -0.5, 0.75]);
        let moved = t.resample(&data, &center, &center, Interpolation::Cubic);
        let restored = t.inverse().resample(&moved, &center, &center, Interpolation::Cubic);

        let peak = data.iter().copied().fold(0.0, f64::max);
        let worst = data
            .iter()
            .zip(restored.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(worst < 0.05 * peak, "max deviation {worst} against peak {peak}");
    }

    #[test]
    fn parameters_round_trip() {
        let params = [0.2, 0.3, -0.4, 1.0, 2.0, 3.0];
        let recovered = RigidTransform::from_parameters(&params).parameters();
        for (a, b) in params.iter().zip(recovered.iter()) {
            assert!((a - b).abs() < TOLERANCE);
        }
    }

    #[test]
    fn pure_translation_moves_a_voxel() {
        let mut data = Array3::zeros((8, 8, 8));
        data[[2, 3, 4]] = 1.0;
        let center = Vector3::new(4.0, 4.0, 4.0);
        let t = RigidTransform::new(Matrix3::identity(), Vector3::new(1.0, 2.0, -1.0));
        let out = t.resample(&data, &center, &center, Interpolation::Linear);
        assert!((out[[3, 5, 3]] - 1.0).abs() < TOLERANCE);
    }
}
