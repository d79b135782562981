//! Harris corner response and top-k corner selection.
//!
//! Structure tensor from 3x3 Sobel gradients, summed over an un-normalized
//! `block_size` box window, with reflect-101 borders:
//!
//!   R = det(M) - k * trace(M)^2
//!
//! Unlike a thresholded detector, corners are ranked and exactly the `n`
//! strongest pixels are kept, with no non-maximum suppression.

use image::GrayImage;

use crate::features::Keypoint;

/// Sobel aperture. Fixed at 3.
const APERTURE: u32 = 3;

#[derive(Debug, Clone)]
pub struct HarrisDetector {
    /// Harris sensitivity, typically 0.04 to 0.06.
    pub k: f32,
    /// Side of the box window over which gradient products are summed.
    pub block_size: usize,
}

impl Default for HarrisDetector {
    fn default() -> Self {
        Self {
            k: 0.04,
            block_size: 2,
        }
    }
}

/// Mirror an out-of-range coordinate back into `0..n` without repeating the
/// edge pixel (`-1 -> 1`, `n -> n - 2`).
fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * n - 2 - i;
        }
    }
    i as usize
}

impl HarrisDetector {
    /// Harris response for every pixel, row-major.
    pub fn corner_response(&self, gray: &GrayImage) -> Vec<f32> {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        if w == 0 || h == 0 {
            return Vec::new();
        }

        let px = |x: isize, y: isize| -> f32 {
            gray.get_pixel(reflect101(x, w) as u32, reflect101(y, h) as u32)[0] as f32
        };
        let scale = 1.0 / ((1u32 << (APERTURE - 1)) as f32 * self.block_size as f32);

        // Gradient products
        let mut xx = vec![0f32; w * h];
        let mut xy = vec![0f32; w * h];
        let mut yy = vec![0f32; w * h];
        for y in 0..h {
            for x in 0..w {
                let (xi, yi) = (x as isize, y as isize);
                let gx = (px(xi + 1, yi - 1) + 2.0 * px(xi + 1, yi) + px(xi + 1, yi + 1))
                    - (px(xi - 1, yi - 1) + 2.0 * px(xi - 1, yi) + px(xi - 1, yi + 1));
                let gy = (px(xi - 1, yi + 1) + 2.0 * px(xi, yi + 1) + px(xi + 1, yi + 1))
                    - (px(xi - 1, yi - 1) + 2.0 * px(xi, yi - 1) + px(xi + 1, yi - 1));
                let (gx, gy) = (gx * scale, gy * scale);

                let i = y * w + x;
                xx[i] = gx * gx;
                xy[i] = gx * gy;
                yy[i] = gy * gy;
            }
        }

        // Box window anchored at its center; an even block reaches one pixel
        // further back than forward.
        let anchor = (self.block_size / 2) as isize;
        let reach = self.block_size as isize - 1 - anchor;

        let mut response = vec![0f32; w * h];
        for y in 0..h {
            for x in 0..w {
                let (mut a, mut b, mut c) = (0f32, 0f32, 0f32);
                for dy in -anchor..=reach {
                    let sy = reflect101(y as isize + dy, h);
                    for dx in -anchor..=reach {
                        let i = sy * w + reflect101(x as isize + dx, w);
                        a += xx[i];
                        b += xy[i];
                        c += yy[i];
                    }
                }
                let det = a * c - b * b;
                let trace = a + c;
                response[y * w + x] = det - self.k * trace * trace;
            }
        }

        response
    }

    /// The `n` pixels with the highest response, strongest first.
    pub fn strongest(&self, gray: &GrayImage, n: usize) -> Vec<Keypoint> {
        let response = self.corner_response(gray);
        select_strongest(&response, gray.width() as usize, n)
    }
}

/// Pick the `n` largest entries of a row-major response map.
///
/// Ties are broken by ascending pixel index so the selection does not depend
/// on the partial sort's internals. Returned keypoints use `(x = column,
/// y = row)`.
pub fn select_strongest(response: &[f32], width: usize, n: usize) -> Vec<Keypoint> {
    if n == 0 || response.is_empty() || width == 0 {
        return Vec::new();
    }

    let by_strength =
        |a: &usize, b: &usize| response[*b].total_cmp(&response[*a]).then(a.cmp(b));

    let mut order: Vec<usize> = (0..response.len()).collect();
    if n < order.len() {
        order.select_nth_unstable_by(n - 1, by_strength);
        order.truncate(n);
    }
    order.sort_unstable_by(by_strength);

    order
        .into_iter()
        .map(|i| Keypoint {
            x: (i % width) as f32,
            y: (i / width) as f32,
            response: response[i],
        })
        .collect()
}
