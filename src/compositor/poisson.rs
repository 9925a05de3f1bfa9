use ndarray::{Array2, Array3};

// over-relaxation factor for the Gauss-Seidel sweeps
const OMEGA: f32 = 1.8;
const TOLERANCE: f32 = 0.01;

/// Gradient-domain blend: solves for a patch whose Laplacian follows `src`
/// inside the footprint (`alpha > 0`) and which equals `dst` on its boundary.
pub fn poisson_blend(src: &Array3<f32>, dst: &Array3<f32>, alpha: &Array2<f32>, iterations: u32) -> Array3<f32> {
    let (h, w, channels) = src.dim();
    if h < 3 || w < 3 {
        return src.clone();
    }

    let inside = |j: usize, i: usize| alpha[[j, i]] > 0.0;
    let interior = Array2::from_shape_fn((h, w), |(j, i)| {
        inside(j, i) && j > 0 && i > 0 && j + 1 < h && i + 1 < w
    });

    let mut f = dst.clone();
    for ((j, i), &is_interior) in interior.indexed_iter() {
        if is_interior {
            for c in 0..channels {
                f[[j, i, c]] = src[[j, i, c]];
            }
        }
    }

    for _ in 0..iterations {
        let mut max_delta = 0.0f32;
        for j in 1..h - 1 {
            for i in 1..w - 1 {
                if !interior[[j, i]] {
                    continue;
                }
                let neighbours = [(j - 1, i), (j + 1, i), (j, i - 1), (j, i + 1)];
                for c in 0..channels {
                    let mut sum = 0.0;
                    let mut guide = 0.0;
                    for &(nj, ni) in neighbours.iter() {
                        sum += f[[nj, ni, c]];
                        if inside(nj, ni) {
                            guide += src[[j, i, c]] - src[[nj, ni, c]];
                        }
                    }
                    let delta = (sum + guide) / 4.0 - f[[j, i, c]];
                    f[[j, i, c]] += OMEGA * delta;
                    max_delta = max_delta.max(delta.abs());
                }
            }
        }
        if max_delta < TOLERANCE {
            break;
        }
    }
    f
}
