//! # Pairwise frame cost
//!
//! How badly frame `j` continues frame `i`. Frame `j` is expected to be a
//! "zoomed in" view of frame `i`, so the homography from `j` onto `i` should
//! keep `j`'s content inside `i`'s extent:
//!
//! - `c0`: distance between `i`'s center and `j`'s center mapped into `i`
//! - `cR`: L2 norm of the residuals between `i`'s matched points and `j`'s
//!   matched points mapped into `i`
//!
//! A plausible mapping (`cR` under half the diagonal) costs `min(c0, cR)`.
//! Anything else, including every [`EstimationFailure`], costs exactly half
//! the diagonal, so an unreliable pair can never look better than a poor but
//! consistent one.

use nalgebra::Point2;
use tracing::debug;

use crate::config::OptimizerConfig;
use crate::error::{EstimationFailure, OptimizerResult};
use crate::features::{CorrespondenceCache, CorrespondenceSet};
use crate::frames::Frame;
use crate::homography::{find_homography, RansacConfig, MIN_CORRESPONDENCES};
use crate::matching::ratio_test_matches;

/// Source of edge weights for the path optimizer.
pub trait PairCost: Sync {
    /// Non-negative cost of showing frame `to` right after frame `from`,
    /// `from < to`.
    fn cost(&self, from: usize, to: usize) -> OptimizerResult<f64>;
}

impl<F> PairCost for F
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    fn cost(&self, from: usize, to: usize) -> OptimizerResult<f64> {
        Ok(self(from, to))
    }
}

/// Cost assigned to pairs whose geometry cannot be trusted.
pub fn fallback_cost(frame: &CorrespondenceSet) -> f64 {
    0.5 * frame.diagonal()
}

/// Geometric cost between two frames, or the reason none could be computed.
pub fn geometric_cost(
    first: &CorrespondenceSet,
    second: &CorrespondenceSet,
    ratio_test: f64,
    ransac: &RansacConfig,
) -> Result<f64, EstimationFailure> {
    let matches = ratio_test_matches(&first.correspondences, &second.correspondences, ratio_test);
    if matches.len() < MIN_CORRESPONDENCES {
        return Err(EstimationFailure::TooFewMatches {
            found: matches.len(),
        });
    }

    let point = |set: &CorrespondenceSet, idx: usize| {
        let k = set.correspondences[idx].keypoint;
        Point2::new(k.x as f64, k.y as f64)
    };
    let first_pts: Vec<Point2<f64>> = matches.iter().map(|m| point(first, m.query)).collect();
    let second_pts: Vec<Point2<f64>> = matches.iter().map(|m| point(second, m.train)).collect();

    let homography = find_homography(&second_pts, &first_pts, ransac)?;

    let (cx, cy) = second.center();
    let mapped_center = homography.transform(&Point2::new(cx, cy))?;
    let mapped_pts = homography.transform_all(&second_pts)?;

    let (fx, fy) = first.center();
    let c0 = (mapped_center - Point2::new(fx, fy)).norm();
    let c_r = first_pts
        .iter()
        .zip(&mapped_pts)
        .map(|(p, q)| (*p - *q).norm_squared())
        .sum::<f64>()
        .sqrt();

    let ceiling = fallback_cost(first);
    Ok(if c_r < ceiling { c0.min(c_r) } else { ceiling })
}

/// [`geometric_cost`] with every estimation failure mapped to the fallback.
pub fn pair_cost(
    first: &CorrespondenceSet,
    second: &CorrespondenceSet,
    ratio_test: f64,
    ransac: &RansacConfig,
) -> f64 {
    geometric_cost(first, second, ratio_test, ransac).unwrap_or_else(|failure| {
        debug!(%failure, "falling back to maximal uncertainty cost");
        fallback_cost(first)
    })
}

/// Pair costs from descriptor matching and homography fitting over the frames
/// of one run. Owns the run's caches; they are dropped with it.
pub struct MatchingCost {
    correspondences: CorrespondenceCache,
    ratio_test: f64,
    ransac: RansacConfig,
}

impl MatchingCost {
    pub fn new(frames: Vec<Frame>, config: &OptimizerConfig) -> Self {
        Self {
            correspondences: CorrespondenceCache::new(frames, config),
            ratio_test: config.ratio_test,
            ransac: RansacConfig::default(),
        }
    }

    pub fn correspondences(&self) -> &CorrespondenceCache {
        &self.correspondences
    }

    /// Extract correspondences for every frame before the sweep needs them
    pub fn prefetch(&self) -> OptimizerResult<()> {
        self.correspondences.prefetch()
    }
}

impl PairCost for MatchingCost {
    fn cost(&self, from: usize, to: usize) -> OptimizerResult<f64> {
        let first = self.correspondences.get(from)?;
        let second = self.correspondences.get(to)?;
        let cost = pair_cost(&first, &second, self.ratio_test, &self.ransac);
        debug!(from, to, cost, "pair cost");
        Ok(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureExtractor;
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn canvas(w: u32, h: u32, seed: u64) -> RgbImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let cols = w / 5 + 1;
        let cells: Vec<[u8; 3]> = (0..cols * (h / 5 + 1))
            .map(|_| [rng.random(), rng.random(), rng.random()])
            .collect();
        RgbImage::from_fn(w, h, |x, y| Rgb(cells[((y / 5) * cols + x / 5) as usize]))
    }

    fn view(canvas: &RgbImage, x: u32, y: u32, w: u32, h: u32) -> RgbImage {
        image::imageops::crop_imm(canvas, x, y, w, h).to_image()
    }

    fn extract(img: &RgbImage, n_features: usize) -> CorrespondenceSet {
        FeatureExtractor::new(n_features).extract(img)
    }

    #[test]
    fn test_identical_frames_cost_nothing() {
        let img = canvas(240, 200, 1);
        let set = extract(&img, 200);
        let cost = geometric_cost(&set, &set, 0.75, &RansacConfig::default()).unwrap();
        assert!(cost < 1e-3, "identical frames cost {cost}");
    }

    #[test]
    fn test_translated_frames_are_cheap() {
        let big = canvas(300, 240, 2);
        let first = extract(&view(&big, 0, 0, 240, 200), 300);
        let second = extract(&view(&big, 6, 4, 240, 200), 300);

        let cost = pair_cost(&first, &second, 0.75, &RansacConfig::default());
        assert!(cost >= 0.0);
        assert!(cost < 0.25 * fallback_cost(&first), "translated frames cost {cost}");
    }

    #[test]
    fn test_unrelated_frames_bounded_by_fallback() {
        let first = extract(&canvas(240, 200, 3), 200);
        let second = extract(&canvas(240, 200, 4), 200);
        let cost = pair_cost(&first, &second, 0.75, &RansacConfig::default());
        assert!(cost >= 0.0 && cost <= fallback_cost(&first));
    }

    #[test]
    fn test_flat_frames_cost_exactly_half_diagonal() {
        let img = RgbImage::from_pixel(160, 120, Rgb([90, 90, 90]));
        let set = extract(&img, 100);
        let expected = 0.5 * (160f64 * 160.0 + 120.0 * 120.0).sqrt();

        assert_eq!(
            geometric_cost(&set, &set, 0.75, &RansacConfig::default()),
            Err(EstimationFailure::TooFewMatches { found: 0 })
        );
        assert_eq!(pair_cost(&set, &set, 0.75, &RansacConfig::default()), expected);
    }

    #[test]
    fn test_zero_features_cost_exactly_half_diagonal() {
        let img = canvas(200, 150, 5);
        let set = extract(&img, 0);
        assert_eq!(
            pair_cost(&set, &set, 0.75, &RansacConfig::default()),
            0.5 * (200f64 * 200.0 + 150.0 * 150.0).sqrt()
        );
    }

    #[test]
    fn test_fallback_uses_first_frame_size() {
        let a = CorrespondenceSet {
            width: 30,
            height: 40,
            correspondences: Vec::new(),
        };
        assert_eq!(fallback_cost(&a), 25.0);
    }

    #[test]
    fn test_closures_are_pair_costs() {
        let cost = |i: usize, j: usize| (j - i) as f64;
        assert_eq!(PairCost::cost(&cost, 2, 5).unwrap(), 3.0);
    }

    #[test]
    fn test_matching_cost_over_files() {
        let dir = tempfile::tempdir().unwrap();
        let img = canvas(220, 180, 6);
        let frames: Vec<Frame> = (0..2)
            .map(|index| {
                let path = dir.path().join(format!("{index}.png"));
                img.save(&path).unwrap();
                Frame { index, path }
            })
            .collect();

        let config = OptimizerConfig {
            n_features: 150,
            ..OptimizerConfig::default()
        };
        let cost = MatchingCost::new(frames, &config);
        let c = cost.cost(0, 1).unwrap();
        assert!(c < 1e-3, "identical files cost {c}");
        assert_eq!(cost.correspondences().extracted(), 2);
    }
}
