use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, Axis};

/// Interpolation order used when a map is resampled on a transformed grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Trilinear (order 1). Cheap; used inside optimization loops.
    Linear,
    /// Cubic B-spline with prefiltering (order 3). Used for final map placement.
    Cubic,
}

/// Pole of the cubic B-spline prefilter.
const CUBIC_POLE: f64 = -0.267_949_192_431_122_7;

/// Resamples `data` so that `output[o] = input[matrix * o + offset]`, with periodic
/// boundaries on every axis.
pub fn affine(
    data: &Array3<f64>,
    matrix: &Matrix3<f64>,
    offset: &Vector3<f64>,
    order: Interpolation,
) -> Array3<f64> {
    let dims = data.dim();
    let sampler = Sampler::new(data, order);
    Array3::from_shape_fn(dims, |(i, j, k)| {
        let p = matrix * Vector3::new(i as f64, j as f64, k as f64) + offset;
        sampler.sample(&p)
    })
}

/// Translates the map by `shift` voxels (fractional shifts are interpolated):
/// `output[o] = input[o - shift]`.
pub fn shift(data: &Array3<f64>, shift: &Vector3<f64>, order: Interpolation) -> Array3<f64> {
    affine(data, &Matrix3::identity(), &(-shift), order)
}

/// Integer circular shift on every axis: `output[i] = input[i - shift]`.
pub fn roll<T: Clone>(data: &Array3<T>, shift: [isize; 3]) -> Array3<T> {
    let (nx, ny, nz) = data.dim();
    Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
        data[[
            wrap(i as isize - shift[0], nx),
            wrap(j as isize - shift[1], ny),
            wrap(k as isize - shift[2], nz),
        ]]
        .clone()
    })
}

/// Rotates the map by `degrees` in the plane perpendicular to `axis` (0 = x, 1 = y, 2 = z),
/// about the array center `(n - 1) / 2`, keeping the output shape.
pub fn rotate_about_axis(
    data: &Array3<f64>,
    axis: usize,
    degrees: f64,
    order: Interpolation,
) -> Array3<f64> {
    let (a, b) = match axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    let (sin, cos) = degrees.to_radians().sin_cos();
    let mut matrix = Matrix3::identity();
    matrix[(a, a)] = cos;
    matrix[(a, b)] = sin;
    matrix[(b, a)] = -sin;
    matrix[(b, b)] = cos;

    let (nx, ny, nz) = data.dim();
    let center = Vector3::new(
        (nx as f64 - 1.0) / 2.0,
        (ny as f64 - 1.0) / 2.0,
        (nz as f64 - 1.0) / 2.0,
    );
    let offset = center - matrix * center;
    affine(data, &matrix, &offset, order)
}

#[inline]
fn wrap(index: isize, len: usize) -> usize {
    index.rem_euclid(len as isize) as usize
}

struct Sampler {
    coefficients: Vec<f64>,
    dims: [usize; 3],
    order: Interpolation,
}

impl Sampler {
    fn new(data: &Array3<f64>, order: Interpolation) -> Self {
        let (nx, ny, nz) = data.dim();
        let prepared = match order {
            Interpolation::Linear => data.to_owned(),
            Interpolation::Cubic => bspline_coefficients(data),
        };
        let coefficients = match prepared.as_slice() {
            Some(slice) => slice.to_vec(),
            None => prepared.iter().copied().collect(),
        };
        Self {
            coefficients,
            dims: [nx, ny, nz],
            order,
        }
    }

    #[inline]
    fn at(&self, i: isize, j: isize, k: isize) -> f64 {
        let [nx, ny, nz] = self.dims;
        let idx = (wrap(i, nx) * ny + wrap(j, ny)) * nz + wrap(k, nz);
        self.coefficients[idx]
    }

    fn sample(&self, p: &Vector3<f64>) -> f64 {
        match self.order {
            Interpolation::Linear => self.sample_linear(p),
            Interpolation::Cubic => self.sample_cubic(p),
        }
    }

    fn sample_linear(&self, p: &Vector3<f64>) -> f64 {
        let base = [p.x.floor(), p.y.floor(), p.z.floor()];
        let frac = [p.x - base[0], p.y - base[1], p.z - base[2]];
        let base = [base[0] as isize, base[1] as isize, base[2] as isize];

        let mut acc = 0.0;
        for di in 0..2 {
            let wx = if di == 0 { 1.0 - frac[0] } else { frac[0] };
            if wx == 0.0 {
                continue;
            }
            for dj in 0..2 {
                let wy = if dj == 0 { 1.0 - frac[1] } else { frac[1] };
                if wy == 0.0 {
                    continue;
                }
                for dk in 0..2 {
                    let wz = if dk == 0 { 1.0 - frac[2] } else { frac[2] };
                    if wz == 0.0 {
                        continue;
                    }
                    acc += wx * wy * wz * self.at(base[0] + di, base[1] + dj, base[2] + dk);
                }
            }
        }
        acc
    }

    fn sample_cubic(&self, p: &Vector3<f64>) -> f64 {
        let base = [p.x.floor(), p.y.floor(), p.z.floor()];
        let wx = cubic_weights(p.x - base[0]);
        let wy = cubic_weights(p.y - base[1]);
        let wz = cubic_weights(p.z - base[2]);
        let base = [base[0] as isize, base[1] as isize, base[2] as isize];

        let mut acc = 0.0;
        for (di, &w_i) in wx.iter().enumerate() {
            let i = base[0] + di as isize - 1;
            for (dj, &w_j) in wy.iter().enumerate() {
                let j = base[1] + dj as isize - 1;
                let w_ij = w_i * w_j;
                for (dk, &w_k) in wz.iter().enumerate() {
                    let k = base[2] + dk as isize - 1;
                    acc += w_ij * w_k * self.at(i, j, k);
                }
            }
        }
        acc
    }
}

/// Cubic B-spline basis weights for the four knots `floor - 1 ..= floor + 2`.
#[inline]
fn cubic_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    let one_minus = 1.0 - t;
    [
        one_minus * one_minus * one_minus / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

/// Converts samples into cubic B-spline coefficients with periodic boundaries, one axis
/// at a time.
fn bspline_coefficients(data: &Array3<f64>) -> Array3<f64> {
    let mut coefficients = data.as_standard_layout().to_owned();
    for axis in 0..3 {
        let len = coefficients.len_of(Axis(axis));
        if len < 2 {
            continue;
        }
        let mut buffer = vec![0.0; len];
        for mut lane in coefficients.lanes_mut(Axis(axis)) {
            for (dst, src) in buffer.iter_mut().zip(lane.iter()) {
                *dst = *src;
            }
            prefilter_periodic(&mut buffer);
            for (dst, src) in lane.iter_mut().zip(buffer.iter()) {
                *dst = *src;
            }
        }
    }
    coefficients
}

fn prefilter_periodic(signal: &mut [f64]) {
    let n = signal.len();
    let z = CUBIC_POLE;
    let gain = (1.0 - z) * (1.0 - 1.0 / z);
    signal.iter_mut().for_each(|v| *v *= gain);

    let zn = z.powi(n as i32);

    // Causal pass, initialized with the periodic sum.
    let mut sum = signal[0];
    let mut zk = z;
    for k in 1..n {
        sum += zk * signal[n - k];
        zk *= z;
    }
    signal[0] = sum / (1.0 - zn);
    for k in 1..n {
        signal[k] += z * signal[k - 1];
    }

    // Anti-causal pass.
    let mut sum = signal[n - 1];
    let mut zk = z;
    for k in 0..n - 1 {
        sum += zk * signal[k];
        zk *= z;
    }
    signal[n - 1] = -z * sum / (1.0 - zn);
    for k in (0..n - 1).rev() {
        signal[k] = z * (signal[k + 1] - signal[k]);
    }
}
