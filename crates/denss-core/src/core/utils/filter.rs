use ndarray::{Array3, Axis};

/// Kernel half-width in standard deviations.
const TRUNCATE: f64 = 4.0;

/// Normalized 1D Gaussian kernel of radius `round(TRUNCATE * sigma)`.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-(x * x) as f64 / denom).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= total);
    kernel
}

/// Separable Gaussian blur with periodic boundaries. `sigma` is in voxels; a
/// non-positive sigma returns an unmodified copy.
pub fn gaussian_blur(data: &Array3<f64>, sigma: f64) -> Array3<f64> {
    let mut out = data.to_owned();
    if !(sigma > 0.0) {
        return out;
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;

    for axis in 0..3 {
        let len = out.len_of(Axis(axis));
        let mut buffer = vec![0.0; len];
        for mut lane in out.lanes_mut(Axis(axis)) {
            for (dst, src) in buffer.iter_mut().zip(lane.iter()) {
                *dst = *src;
            }
            for (i, value) in lane.iter_mut().enumerate() {
                let mut acc = 0.0;
                for (t, &w) in kernel.iter().enumerate() {
                    let src = (i as isize + t as isize - radius).rem_euclid(len as isize);
                    acc += w * buffer[src as usize];
                }
                *value = acc;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(1.5);
        assert_eq!(kernel.len(), 2 * 6 + 1);
        assert!((kernel.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((kernel[0] - kernel[kernel.len() - 1]).abs() < 1e-15);
    }

    #[test]
    fn blur_preserves_total_mass() {
        let mut data = Array3::zeros((10, 10, 10));
        data[[0, 5, 9]] = 4.0;
        data[[3, 3, 3]] = 1.0;
        let blurred = gaussian_blur(&data, 2.0);
        assert!((blurred.sum() - 5.0).abs() < 1e-9);
        assert!(blurred[[0, 5, 9]] < 4.0);
    }

    #[test]
    fn blur_wraps_across_edges() {
        let mut data = Array3::zeros((8, 8, 8));
        data[[0, 0, 0]] = 1.0;
        let blurred = gaussian_blur(&data, 1.0);
        assert!((blurred[[7, 0, 0]] - blurred[[1, 0, 0]]).abs() < 1e-12);
        assert!(blurred[[7, 0, 0]] > 0.0);
    }

    #[test]
    fn zero_sigma_is_identity() {
        let data = Array3::from_shape_fn((4, 4, 4), |(i, j, k)| (i + j * k) as f64);
        assert_eq!(gaussian_blur(&data, 0.0), data);
    }
}
