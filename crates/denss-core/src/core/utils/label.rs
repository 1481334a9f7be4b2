use ndarray::Array3;
use std::collections::VecDeque;

/// Labels connected `true` voxels using full 26-connectivity (faces, edges and corners).
///
/// Background voxels get label `0`; features are numbered `1..=count` in scan order.
/// Returns the label array and the feature count.
pub fn label_components(mask: &Array3<bool>) -> (Array3<usize>, usize) {
    let (nx, ny, nz) = mask.dim();
    let mut labels = Array3::<usize>::zeros((nx, ny, nz));
    let mut count = 0;
    let mut queue = VecDeque::new();

    for ((i, j, k), &set) in mask.indexed_iter() {
        if !set || labels[[i, j, k]] != 0 {
            continue;
        }
        count += 1;
        labels[[i, j, k]] = count;
        queue.push_back((i, j, k));

        while let Some((ci, cj, ck)) = queue.pop_front() {
            for di in -1isize..=1 {
                for dj in -1isize..=1 {
                    for dk in -1isize..=1 {
                        if di == 0 && dj == 0 && dk == 0 {
                            continue;
                        }
                        let (Some(ni), Some(nj), Some(nk)) = (
                            neighbor(ci, di, nx),
                            neighbor(cj, dj, ny),
                            neighbor(ck, dk, nz),
                        ) else {
                            continue;
                        };
                        if mask[[ni, nj, nk]] && labels[[ni, nj, nk]] == 0 {
                            labels[[ni, nj, nk]] = count;
                            queue.push_back((ni, nj, nk));
                        }
                    }
                }
            }
        }
    }

    (labels, count)
}

#[inline]
fn neighbor(index: usize, delta: isize, len: usize) -> Option<usize> {
    let n = index as isize + delta;
    (n >= 0 && (n as usize) < len).then_some(n as usize)
}

/// Sums `values` per feature. Entry `0` holds the background sum, entry `f` the sum of
/// feature `f`.
pub fn feature_sums(values: &Array3<f64>, labels: &Array3<usize>, count: usize) -> Vec<f64> {
    let mut sums = vec![0.0; count + 1];
    for (&value, &label) in values.iter().zip(labels.iter()) {
        sums[label] += value;
    }
    sums
}
