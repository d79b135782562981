//! Error types for the optimizer.

use std::path::PathBuf;
use thiserror::Error;

pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Fatal errors. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Could not parse configuration JSON: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("No frames found in {}", .0.display())]
    NoFrames(PathBuf),

    #[error("Cannot optimize an empty frame sequence")]
    EmptySequence,

    #[error("Frame file name has no sequence number: {}", .0.display())]
    UnnumberedFrame(PathBuf),

    #[error("Failed to load frame {}: {source}", path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Frame index {index} is out of range for {len} frames")]
    FrameOutOfRange { index: usize, len: usize },

    #[error("Cost source returned {cost} for edge {from} -> {to}")]
    InvalidCost { from: usize, to: usize, cost: f64 },

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OptimizerError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Reasons a pair of frames could not be related by a trustworthy homography.
///
/// None of these are fatal: the cost estimator maps every variant to the
/// fallback cost of half the frame diagonal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimationFailure {
    #[error("only {found} matches survived the ratio test, need 4")]
    TooFewMatches { found: usize },

    #[error("no sample produced a consensus model")]
    NoConsensus,

    #[error("homography is rank deficient")]
    RankDeficient,

    #[error("point mapped to infinity")]
    PointAtInfinity,
}
