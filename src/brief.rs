//! BRIEF binary descriptors.
//!
//! Each bit compares the box-smoothed intensity at two fixed offsets around
//! the keypoint. Orientation is not estimated, so the descriptor is only
//! meaningful between views with little in-plane rotation, which holds for a
//! forward-moving street-level burst.

use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::features::{Correspondence, Keypoint};

pub const DESCRIPTOR_BYTES: usize = 32;
pub const PATCH_SIZE: i32 = 48;
pub const KERNEL_SIZE: i32 = 9;

/// Fixed so descriptors, and therefore costs, are identical across runs.
const PATTERN_SEED: u64 = 0x4252_4945_465f_3332;

pub type Descriptor = [u8; DESCRIPTOR_BYTES];

pub struct BriefExtractor {
    pattern: Vec<[(i32, i32); 2]>,
}

impl Default for BriefExtractor {
    fn default() -> Self {
        Self::with_seed(PATTERN_SEED)
    }
}

impl BriefExtractor {
    pub fn with_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let reach = PATCH_SIZE / 2;
        let mut offset = || (rng.random_range(-reach..=reach), rng.random_range(-reach..=reach));

        let pattern = (0..DESCRIPTOR_BYTES * 8)
            .map(|_| [offset(), offset()])
            .collect();

        Self { pattern }
    }

    /// Keypoints closer than this to any image edge have no descriptor.
    pub const fn border() -> u32 {
        (PATCH_SIZE / 2 + KERNEL_SIZE / 2) as u32
    }

    /// Describe every keypoint that lies far enough inside `gray`, keeping the
    /// input order. Keypoints too close to the border are dropped.
    pub fn compute(&self, gray: &GrayImage, keypoints: &[Keypoint]) -> Vec<Correspondence> {
        let (w, h) = gray.dimensions();
        let border = Self::border();
        if w <= 2 * border || h <= 2 * border {
            return Vec::new();
        }

        let integral = IntegralImage::new(gray);
        let inside = |k: &Keypoint| {
            k.x >= border as f32
                && k.x < (w - border) as f32
                && k.y >= border as f32
                && k.y < (h - border) as f32
        };

        keypoints
            .iter()
            .filter(|k| inside(k))
            .map(|k| Correspondence {
                keypoint: *k,
                descriptor: self.describe(&integral, k.x as i64, k.y as i64),
            })
            .collect()
    }

    fn describe(&self, integral: &IntegralImage, x: i64, y: i64) -> Descriptor {
        let half = (KERNEL_SIZE / 2) as i64;
        let mut descriptor = [0u8; DESCRIPTOR_BYTES];

        for (i, [a, b]) in self.pattern.iter().enumerate() {
            let sa = integral.box_sum(x + a.0 as i64, y + a.1 as i64, half);
            let sb = integral.box_sum(x + b.0 as i64, y + b.1 as i64, half);
            if sa < sb {
                descriptor[i / 8] |= 1 << (7 - i % 8);
            }
        }

        descriptor
    }
}

/// Summed-area table with a zero first row and column.
struct IntegralImage {
    stride: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut sums = vec![0u64; stride * (h + 1)];

        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                row += gray.get_pixel(x as u32, y as u32)[0] as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }

        Self { stride, sums }
    }

    /// Sum over the square of side `2 * half + 1` centered on `(cx, cy)`.
    /// The caller keeps the square inside the image.
    fn box_sum(&self, cx: i64, cy: i64, half: i64) -> u64 {
        let x0 = (cx - half) as usize;
        let y0 = (cy - half) as usize;
        let x1 = (cx + half + 1) as usize;
        let y1 = (cy + half + 1) as usize;
        let at = |x: usize, y: usize| self.sums[y * self.stride + x];
        at(x1, y1) + at(x0, y0) - at(x1, y0) - at(x0, y1)
    }
}

/// Euclidean distance between two descriptors, each byte taken as one
/// coordinate.
pub fn descriptor_distance(a: &Descriptor, b: &Descriptor) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
