//! # Per-frame correspondences
//!
//! A frame's correspondences are its strongest Harris corners, each paired
//! with a BRIEF descriptor. They are computed once per frame index for the
//! lifetime of a run and shared between every pair cost that references the
//! frame.
//!
//! Before detection the bottom [`WATERMARK_ROWS`] rows are cropped away: the
//! source imagery carries a fixed overlay there that would otherwise produce
//! identical, perfectly matching corners in every frame.

use image::{imageops, GrayImage, Luma, RgbImage};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

use crate::brief::{BriefExtractor, Descriptor};
use crate::cache::KeyedCache;
use crate::config::OptimizerConfig;
use crate::error::{OptimizerError, OptimizerResult};
use crate::frames::{Frame, FrameCache};
use crate::harris::HarrisDetector;

/// Height of the overlay band removed from the bottom of every frame.
pub const WATERMARK_ROWS: u32 = 19;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub response: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Correspondence {
    pub keypoint: Keypoint,
    pub descriptor: Descriptor,
}

/// Everything the cost estimator needs to know about one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrespondenceSet {
    /// Full frame size, before the watermark crop.
    pub width: u32,
    pub height: u32,
    pub correspondences: Vec<Correspondence>,
}

impl CorrespondenceSet {
    pub fn len(&self) -> usize {
        self.correspondences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.correspondences.is_empty()
    }

    pub fn diagonal(&self) -> f64 {
        let (w, h) = (self.width as f64, self.height as f64);
        (w * w + h * h).sqrt()
    }

    /// Pixel center, rounded down like the integer frame size.
    pub fn center(&self) -> (f64, f64) {
        ((self.width / 2) as f64, (self.height / 2) as f64)
    }
}

/// 8-bit Rec.601 luma, `0.299 R + 0.587 G + 0.114 B`, in 14-bit fixed point
/// with rounding.
pub fn luma601(image: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = (r as u32 * R + g as u32 * G + b as u32 * B + (1 << (SHIFT - 1))) >> SHIFT;
        Luma([luma as u8])
    })
}

pub struct FeatureExtractor {
    n_features: usize,
    harris: HarrisDetector,
    brief: BriefExtractor,
}

impl FeatureExtractor {
    pub fn new(n_features: usize) -> Self {
        Self {
            n_features,
            harris: HarrisDetector::default(),
            brief: BriefExtractor::default(),
        }
    }

    pub fn extract(&self, image: &RgbImage) -> CorrespondenceSet {
        let (width, height) = image.dimensions();
        let cropped = imageops::crop_imm(image, 0, 0, width, height.saturating_sub(WATERMARK_ROWS))
            .to_image();
        let gray = luma601(&cropped);

        let corners = self.harris.strongest(&gray, self.n_features);
        let correspondences = self.brief.compute(&gray, &corners);

        CorrespondenceSet {
            width,
            height,
            correspondences,
        }
    }
}

/// Correspondence sets for the frames of one run, keyed by frame index.
pub struct CorrespondenceCache {
    frames: Vec<Frame>,
    images: FrameCache,
    sets: KeyedCache<usize, CorrespondenceSet>,
    extractor: FeatureExtractor,
}

impl CorrespondenceCache {
    pub fn new(frames: Vec<Frame>, config: &OptimizerConfig) -> Self {
        Self {
            frames,
            images: FrameCache::default(),
            sets: KeyedCache::unbounded(),
            extractor: FeatureExtractor::new(config.n_features),
        }
    }

    /// Correspondences of the frame at `index`, extracted on first use
    pub fn get(&self, index: usize) -> OptimizerResult<Arc<CorrespondenceSet>> {
        let frame = self.frames.get(index).ok_or(OptimizerError::FrameOutOfRange {
            index,
            len: self.frames.len(),
        })?;

        self.sets.get_or_try_insert_with(index, || {
            let image = self.images.load(&frame.path)?;
            let set = self.extractor.extract(&image);
            debug!(frame = index, correspondences = set.len(), "extracted correspondences");
            Ok(set)
        })
    }

    /// Extract every frame in parallel ahead of the path sweep.
    pub fn prefetch(&self) -> OptimizerResult<()> {
        (0..self.frames.len())
            .into_par_iter()
            .try_for_each(|index| self.get(index).map(|_| ()))?;

        info!(
            frames = self.frames.len(),
            decoded = self.images.decoded(),
            "correspondences ready"
        );
        Ok(())
    }

    pub fn extracted(&self) -> usize {
        self.sets.computations()
    }
}
