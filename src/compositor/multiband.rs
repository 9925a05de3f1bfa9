use ndarray::{Array2, Array3, Axis, Zip};

/// Laplacian pyramid blend of `src` over `dst`, weighted by a Gaussian pyramid of `alpha`.
pub fn multiband_blend(src: &Array3<f32>, dst: &Array3<f32>, alpha: &Array2<f32>, levels: u32) -> Array3<f32> {
    let (h, w, _) = src.dim();
    let levels = level_count(h, w, levels);
    let mask = alpha.clone().insert_axis(Axis(2));

    let src_pyr = laplacian_pyramid(src, levels);
    let dst_pyr = laplacian_pyramid(dst, levels);
    let mask_pyr = gaussian_pyramid(&mask, levels);

    let blended: Vec<Array3<f32>> = src_pyr
        .iter()
        .zip(dst_pyr.iter())
        .zip(mask_pyr.iter())
        .map(|((s, d), m)| {
            let mut out = d.clone();
            Zip::indexed(&mut out).and(s).for_each(|(j, i, _), o, &sv| {
                let a = m[[j, i, 0]];
                *o = sv * a + *o * (1.0 - a);
            });
            out
        })
        .collect();

    collapse(blended)
}

// stop once either side would fall below 4 pixels
fn level_count(h: usize, w: usize, requested: u32) -> usize {
    let mut levels = 1;
    let (mut h, mut w) = (h, w);
    while levels < requested.max(1) as usize && h >= 8 && w >= 8 {
        h = (h + 1) / 2;
        w = (w + 1) / 2;
        levels += 1;
    }
    levels
}

// 2x2 box average, odd edges replicate
fn downsample(image: &Array3<f32>) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let (nh, nw) = ((h + 1) / 2, (w + 1) / 2);
    Array3::from_shape_fn((nh, nw, c), |(j, i, ch)| {
        let (y0, x0) = (2 * j, 2 * i);
        let (y1, x1) = ((y0 + 1).min(h - 1), (x0 + 1).min(w - 1));
        (image[[y0, x0, ch]] + image[[y0, x1, ch]] + image[[y1, x0, ch]] + image[[y1, x1, ch]]) / 4.0
    })
}

// bilinear, pixel-centre aligned
fn upsample(image: &Array3<f32>, h: usize, w: usize) -> Array3<f32> {
    let (sh, sw, c) = image.dim();
    let (scale_y, scale_x) = (sh as f32 / h as f32, sw as f32 / w as f32);
    Array3::from_shape_fn((h, w, c), |(j, i, ch)| {
        let y = ((j as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (sh - 1) as f32);
        let x = ((i as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (sw - 1) as f32);
        let (y0, x0) = (y.floor() as usize, x.floor() as usize);
        let (y1, x1) = ((y0 + 1).min(sh - 1), (x0 + 1).min(sw - 1));
        let (ty, tx) = (y - y0 as f32, x - x0 as f32);
        let top = image[[y0, x0, ch]] * (1.0 - tx) + image[[y0, x1, ch]] * tx;
        let bottom = image[[y1, x0, ch]] * (1.0 - tx) + image[[y1, x1, ch]] * tx;
        top * (1.0 - ty) + bottom * ty
    })
}

fn gaussian_pyramid(image: &Array3<f32>, levels: usize) -> Vec<Array3<f32>> {
    let mut pyramid = vec![image.clone()];
    for _ in 1..levels {
        let next = downsample(&pyramid[pyramid.len() - 1]);
        pyramid.push(next);
    }
    pyramid
}

fn laplacian_pyramid(image: &Array3<f32>, levels: usize) -> Vec<Array3<f32>> {
    let gaussian = gaussian_pyramid(image, levels);
    let mut pyramid = Vec::with_capacity(levels);
    for k in 0..levels {
        if k + 1 == levels {
            pyramid.push(gaussian[k].clone());
        } else {
            let (h, w, _) = gaussian[k].dim();
            pyramid.push(&gaussian[k] - &upsample(&gaussian[k + 1], h, w));
        }
    }
    pyramid
}

fn collapse(mut pyramid: Vec<Array3<f32>>) -> Array3<f32> {
    let mut image = match pyramid.pop() {
        Some(top) => top,
        None => return Array3::zeros((0, 0, 3)),
    };
    while let Some(level) = pyramid.pop() {
        let (h, w, _) = level.dim();
        image = upsample(&image, h, w) + &level;
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pyramid_collapses_back_to_input() {
        let image = Array3::from_shape_fn((20, 24, 3), |(j, i, c)| (j * 7 + i * 3 + c) as f32);
        let restored = collapse(laplacian_pyramid(&image, 3));
        assert!(restored
            .iter()
            .zip(image.iter())
            .all(|(a, b)| (a - b).abs() < 1e-3));
    }

    #[test]
    fn full_and_empty_masks_pick_one_side() {
        let src = Array3::from_elem((16, 16, 3), 200.0);
        let dst = Array3::from_elem((16, 16, 3), 10.0);

        let all = multiband_blend(&src, &dst, &Array2::from_elem((16, 16), 1.0), 4);
        assert!(all.iter().all(|&v| (v - 200.0).abs() < 1e-3));

        let none = multiband_blend(&src, &dst, &Array2::zeros((16, 16)), 4);
        assert!(none.iter().all(|&v| (v - 10.0).abs() < 1e-3));
    }

    #[test]
    fn small_images_use_a_single_level() {
        assert_eq!(level_count(5, 100, 4), 1);
        assert_eq!(level_count(64, 64, 4), 4);
    }
}
