pub mod brief;
pub mod cache;
pub mod config;
pub mod cost;
pub mod error;
pub mod features;
pub mod frames;
pub mod harris;
pub mod homography;
pub mod matching;
pub mod optimizer;

use std::path::Path;
use std::time::Instant;
use tracing::info;

pub use config::OptimizerConfig;
pub use cost::{MatchingCost, PairCost};
pub use error::{OptimizerError, OptimizerResult};
pub use frames::{discover_frames, Frame};
pub use optimizer::{OptimizedPath, PathOptimizer};

/// Choose the frames of `dir` that form the smoothest sequence.
///
/// Frames are extracted in parallel on a pool sized by `config.threads`, then
/// swept once. Every cache built here is dropped before returning.
pub fn optimize_directory(dir: &Path, config: &OptimizerConfig) -> OptimizerResult<OptimizedPath> {
    config.validate()?;
    let frames = discover_frames(dir)?;
    let n = frames.len();
    let threads = config.thread_count();

    info!(
        dir = %dir.display(),
        frames = n,
        threads,
        window = config.window_size,
        velocity_factor = config.velocity_factor,
        "optimizing frame path"
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    let start = Instant::now();

    let cost = MatchingCost::new(frames, config);
    let path = pool.install(|| {
        cost.prefetch()?;
        PathOptimizer::from_config(config).optimize(n, &cost)
    })?;

    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        kept = path.indices.len(),
        "done"
    );
    Ok(path)
}
