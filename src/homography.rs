//! Robust planar homography estimation.
//!
//! Minimal 4-point samples are fitted with the normalized DLT (Hartley
//! conditioning, null vector of AᵀA) and scored by reprojection error. The
//! best consensus set is refit with the same DLT over all of its inliers.
//!
//! The sampler is seeded, so the same matches always produce the same model.

use nalgebra::{DMatrix, Matrix3, Point2, Vector3};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

use crate::error::EstimationFailure;

const RANSAC_SEED: u64 = 0x5eed_4f50_5449_4d5a;

/// Samples needed to fit a homography.
pub const MIN_CORRESPONDENCES: usize = 4;

#[derive(Debug, Clone)]
pub struct RansacConfig {
    /// Maximum reprojection error, in pixels, for a point to count as inlier.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Stop once the probability of having drawn an all-inlier sample
    /// reaches this.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: RANSAC_SEED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
    /// Wrap a raw 3x3 matrix, scaling it so `h22 = 1` when possible.
    /// Singular or non-finite matrices are rejected.
    pub fn from_matrix(m: Matrix3<f64>) -> Result<Self, EstimationFailure> {
        if !m.iter().all(|v| v.is_finite()) {
            return Err(EstimationFailure::RankDeficient);
        }

        let m = if m[(2, 2)].abs() > f64::EPSILON {
            m / m[(2, 2)]
        } else {
            m
        };

        let scale = m.norm();
        if scale < f64::EPSILON || (m.determinant() / scale.powi(3)).abs() < 1e-12 {
            return Err(EstimationFailure::RankDeficient);
        }

        Ok(Self(m))
    }

    /// Perspective transform of a single point.
    pub fn transform(&self, p: &Point2<f64>) -> Result<Point2<f64>, EstimationFailure> {
        let v = self.0 * Vector3::new(p.x, p.y, 1.0);
        if v.z.abs() < f64::EPSILON {
            return Err(EstimationFailure::PointAtInfinity);
        }
        let mapped = Point2::new(v.x / v.z, v.y / v.z);
        if mapped.x.is_finite() && mapped.y.is_finite() {
            Ok(mapped)
        } else {
            Err(EstimationFailure::PointAtInfinity)
        }
    }

    pub fn transform_all(&self, points: &[Point2<f64>]) -> Result<Vec<Point2<f64>>, EstimationFailure> {
        points.iter().map(|p| self.transform(p)).collect()
    }

    fn squared_error(&self, src: &Point2<f64>, dst: &Point2<f64>) -> f64 {
        match self.transform(src) {
            Ok(mapped) => (mapped - *dst).norm_squared(),
            Err(_) => f64::INFINITY,
        }
    }
}

/// Similarity that moves the centroid to the origin and scales the mean
/// distance from it to √2.
fn conditioning(points: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| (p.x - cx).hypot(p.y - cy))
        .sum::<f64>()
        / n;

    if mean_dist < f64::EPSILON {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// Least-squares DLT fit of `dst ~ H * src`.
fn fit_dlt(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < MIN_CORRESPONDENCES || dst.len() != n {
        return None;
    }

    let ts = conditioning(src)?;
    let td = conditioning(dst)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let p = ts * Vector3::new(s.x, s.y, 1.0);
        let q = td * Vector3::new(d.x, d.y, 1.0);
        let (x, y) = (p.x, p.y);
        let (u, v) = (q.x, q.y);

        let r = 2 * i;
        a[(r, 0)] = -x;
        a[(r, 1)] = -y;
        a[(r, 2)] = -1.0;
        a[(r, 6)] = u * x;
        a[(r, 7)] = u * y;
        a[(r, 8)] = u;

        a[(r + 1, 3)] = -x;
        a[(r + 1, 4)] = -y;
        a[(r + 1, 5)] = -1.0;
        a[(r + 1, 6)] = v * x;
        a[(r + 1, 7)] = v * y;
        a[(r + 1, 8)] = v;
    }

    // Null vector of A: eigenvector of AᵀA with the smallest eigenvalue.
    let eigen = (a.transpose() * &a).symmetric_eigen();
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|(_, x), (_, y)| x.total_cmp(y))?;
    let h = eigen.eigenvectors.column(min_idx);

    let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let td_inv = td.try_inverse()?;
    Some(td_inv * normalized * ts)
}

/// True if any three of the points are (nearly) collinear.
fn is_degenerate(points: &[Point2<f64>]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().any(|&[i, j, k]| {
        let (d1, d2) = (points[j] - points[i], points[k] - points[i]);
        let cross = d1.x * d2.y - d1.y * d2.x;
        cross.abs() <= f32::EPSILON as f64 * (d1.x.abs() + d1.y.abs() + d2.x.abs() + d2.y.abs())
    })
}

/// Iterations needed to draw an all-inlier sample with the configured
/// confidence, given the current inlier ratio. Never exceeds `current`.
fn adaptive_iterations(confidence: f64, inliers: usize, total: usize, current: usize) -> usize {
    let inlier_ratio = inliers as f64 / total as f64;
    let num = (1.0 - confidence).max(f64::MIN_POSITIVE).ln();
    let denom = (1.0 - inlier_ratio.powi(MIN_CORRESPONDENCES as i32)).ln();

    if denom >= 0.0 || -num >= current as f64 * -denom {
        return current;
    }
    (num / denom).round() as usize
}

/// Estimate the homography mapping `src` points onto `dst` points.
pub fn find_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    config: &RansacConfig,
) -> Result<Homography, EstimationFailure> {
    let n = src.len().min(dst.len());
    if n < MIN_CORRESPONDENCES {
        return Err(EstimationFailure::TooFewMatches { found: n });
    }
    let (src, dst) = (&src[..n], &dst[..n]);

    if n == MIN_CORRESPONDENCES {
        let m = fit_dlt(src, dst).ok_or(EstimationFailure::RankDeficient)?;
        return Homography::from_matrix(m);
    }

    let threshold_sq = config.threshold * config.threshold;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(Homography, Vec<bool>, usize)> = None;
    let mut budget = config.max_iterations;
    let mut iteration = 0;

    while iteration < budget {
        iteration += 1;

        let sample = index::sample(&mut rng, n, MIN_CORRESPONDENCES);
        let s: Vec<Point2<f64>> = sample.iter().map(|i| src[i]).collect();
        let d: Vec<Point2<f64>> = sample.iter().map(|i| dst[i]).collect();
        if is_degenerate(&s) || is_degenerate(&d) {
            continue;
        }

        let Some(model) = fit_dlt(&s, &d).and_then(|m| Homography::from_matrix(m).ok()) else {
            continue;
        };

        let mask: Vec<bool> = src
            .iter()
            .zip(dst)
            .map(|(s, d)| model.squared_error(s, d) <= threshold_sq)
            .collect();
        let count = mask.iter().filter(|&&inlier| inlier).count();

        if best.as_ref().map_or(true, |(_, _, best_count)| count > *best_count) {
            budget = adaptive_iterations(config.confidence, count, n, budget);
            best = Some((model, mask, count));
        }
    }

    let (model, mask, count) = best.ok_or(EstimationFailure::NoConsensus)?;
    if count < MIN_CORRESPONDENCES {
        return Err(EstimationFailure::NoConsensus);
    }

    let (inlier_src, inlier_dst): (Vec<_>, Vec<_>) = src
        .iter()
        .zip(dst)
        .zip(&mask)
        .filter(|&(_, &inlier)| inlier)
        .map(|((s, d), _)| (*s, *d))
        .unzip();

    Ok(fit_dlt(&inlier_src, &inlier_dst)
        .and_then(|m| Homography::from_matrix(m).ok())
        .unwrap_or(model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn grid(n: usize) -> Vec<Point2<f64>> {
        (0..n)
            .map(|i| Point2::new((i % 7) as f64 * 37.0 + 11.0, (i / 7) as f64 * 23.0 + 5.0 + (i % 3) as f64))
            .collect()
    }

    fn known() -> Homography {
        Homography::from_matrix(Matrix3::new(
            1.02, 0.03, 12.0, //
            -0.02, 0.98, -7.0, //
            1e-5, 2e-5, 1.0,
        ))
        .unwrap()
    }

    fn max_error(h: &Homography, src: &[Point2<f64>], dst: &[Point2<f64>]) -> f64 {
        src.iter()
            .zip(dst)
            .map(|(s, d)| (h.transform(s).unwrap() - *d).norm())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_identity_recovered() {
        let pts = grid(20);
        let h = find_homography(&pts, &pts, &RansacConfig::default()).unwrap();
        assert!(max_error(&h, &pts, &pts) < 1e-6);
    }

    #[test]
    fn test_known_homography_recovered() {
        let src = grid(30);
        let truth = known();
        let dst = truth.transform_all(&src).unwrap();
        let h = find_homography(&src, &dst, &RansacConfig::default()).unwrap();
        assert!(max_error(&h, &src, &dst) < 1e-6);
    }

    #[test]
    fn test_exactly_four_points_solved_directly() {
        let src = vec![
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(100.0, 80.0),
            Point2::new(0.0, 80.0),
        ];
        let dst: Vec<_> = src.iter().map(|p| Point2::new(p.x + 5.0, p.y - 3.0)).collect();
        let h = find_homography(&src, &dst, &RansacConfig::default()).unwrap();
        assert!(max_error(&h, &src, &dst) < 1e-6);
    }

    #[test]
    fn test_outliers_rejected() {
        let mut src = grid(35);
        let truth = known();
        let mut dst = truth.transform_all(&src).unwrap();

        let mut rng = StdRng::seed_from_u64(99);
        while src.len() < 47 {
            let s = Point2::new(rng.random_range(0.0..300.0), rng.random_range(0.0..200.0));
            let d = Point2::new(rng.random_range(0.0..300.0), rng.random_range(0.0..200.0));
            // keep outliers well away from the true mapping
            if (truth.transform(&s).unwrap() - d).norm() > 10.0 {
                src.push(s);
                dst.push(d);
            }
        }

        let h = find_homography(&src, &dst, &RansacConfig::default()).unwrap();
        assert!(max_error(&h, &src[..35], &dst[..35]) < 1e-6);
    }

    #[test]
    fn test_too_few_points() {
        let pts = grid(3);
        assert_eq!(
            find_homography(&pts, &pts, &RansacConfig::default()),
            Err(EstimationFailure::TooFewMatches { found: 3 })
        );
    }

    #[test]
    fn test_collinear_points_have_no_consensus() {
        let pts: Vec<_> = (0..10).map(|i| Point2::new(i as f64 * 10.0, i as f64 * 5.0)).collect();
        assert_eq!(
            find_homography(&pts, &pts, &RansacConfig::default()),
            Err(EstimationFailure::NoConsensus)
        );
    }

    #[test]
    fn test_estimation_is_deterministic() {
        let mut src = grid(25);
        let mut dst = known().transform_all(&src).unwrap();
        src.push(Point2::new(3.0, 190.0));
        dst.push(Point2::new(280.0, 4.0));

        let config = RansacConfig::default();
        let a = find_homography(&src, &dst, &config).unwrap();
        let b = find_homography(&src, &dst, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_singular_matrix_rejected() {
        let singular = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0);
        assert_eq!(
            Homography::from_matrix(singular),
            Err(EstimationFailure::RankDeficient)
        );
        assert_eq!(
            Homography::from_matrix(Matrix3::zeros()),
            Err(EstimationFailure::RankDeficient)
        );
    }

    #[test]
    fn test_point_at_infinity() {
        let h = Homography::from_matrix(Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -1.0))
            .unwrap();
        assert_eq!(
            h.transform(&Point2::new(1.0, 5.0)),
            Err(EstimationFailure::PointAtInfinity)
        );
        assert!(h.transform(&Point2::new(3.0, 5.0)).is_ok());
    }

    #[test]
    fn test_adaptive_iterations() {
        assert_eq!(adaptive_iterations(0.995, 10, 10, 2000), 0);
        assert_eq!(adaptive_iterations(0.995, 0, 10, 2000), 2000);
        let half = adaptive_iterations(0.995, 5, 10, 2000);
        assert!(half > 0 && half < 2000);
    }
}
