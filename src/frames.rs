use image::RgbImage;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::cache::KeyedCache;
use crate::error::{OptimizerError, OptimizerResult};

/// Frames revisited inside one look-ahead window fit comfortably in this.
pub const FRAME_CACHE_CAPACITY: usize = 16;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One input image. `index` is its position in the sorted sequence and is
/// used as its identity everywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: usize,
    pub path: PathBuf,
}

/// Numeric sequence key of a frame file: the digits of its file name, with
/// every other character ignored. Leading zeros are dropped so that the key
/// compares numerically (`frame2` < `frame10`) without any overflow limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceKey(String);

impl SequenceKey {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy();
        let digits: String = name.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }

        let trimmed = digits.trim_start_matches('0');
        Some(Self(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }))
    }
}

impl Ord for SequenceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SequenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Lists the images in `dir` and assigns indices in sequence-number order.
pub fn discover_frames(dir: &Path) -> OptimizerResult<Vec<Frame>> {
    if !dir.is_dir() {
        return Err(OptimizerError::NotADirectory(dir.to_path_buf()));
    }

    let mut keyed = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !is_image(&path) {
            continue;
        }
        let key = SequenceKey::from_path(&path)
            .ok_or_else(|| OptimizerError::UnnumberedFrame(path.clone()))?;
        keyed.push((key, path));
    }

    if keyed.is_empty() {
        return Err(OptimizerError::NoFrames(dir.to_path_buf()));
    }

    // read_dir order is platform dependent; equal keys fall back to the name
    keyed.sort_by(|(ka, pa), (kb, pb)| ka.cmp(kb).then_with(|| pa.file_name().cmp(&pb.file_name())));

    let frames: Vec<Frame> = keyed
        .into_iter()
        .enumerate()
        .map(|(index, (_, path))| Frame { index, path })
        .collect();

    debug!(count = frames.len(), dir = %dir.display(), "discovered frames");
    Ok(frames)
}

/// Decoded frames keyed by source path, least recently used evicted first.
pub struct FrameCache {
    images: KeyedCache<PathBuf, RgbImage>,
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(FRAME_CACHE_CAPACITY)
    }
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            images: KeyedCache::bounded(capacity),
        }
    }

    /// Loads a frame as 8-bit RGB, decoding it at most once while cached
    pub fn load(&self, path: &Path) -> OptimizerResult<Arc<RgbImage>> {
        self.images.get_or_try_insert_with(path.to_path_buf(), || {
            debug!(path = %path.display(), "decoding frame");
            image::open(path)
                .map(|img| img.to_rgb8())
                .map_err(|source| OptimizerError::ImageLoad {
                    path: path.to_path_buf(),
                    source,
                })
        })
    }

    pub fn decoded(&self) -> usize {
        self.images.computations()
    }
}
