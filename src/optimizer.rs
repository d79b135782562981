//! # Windowed shortest path through a frame sequence
//!
//! Frames form a DAG: an edge `i -> j` exists for `1 <= j - i <= window_size`
//! and weighs
//!
//!   cost(i, j) + velocity_factor * (j - i - 1)^2
//!
//! so skipping frames is allowed but penalized super-linearly, which keeps the
//! apparent motion of the rendered sequence smooth. A single forward sweep in
//! index order relaxes every edge once; the cheapest path is then read back
//! through the predecessor links.
//!
//! Pairs further apart than the window are never evaluated. This bounds the
//! number of (expensive) pair costs to `n * window_size`.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::OptimizerConfig;
use crate::cost::PairCost;
use crate::error::{OptimizerError, OptimizerResult};

/// Cheapest known cost to reach each frame and the frame it is reached from.
#[derive(Debug, Clone)]
pub struct PathState {
    best_cost: Vec<f64>,
    predecessor: Vec<usize>,
}

impl PathState {
    fn new(n: usize) -> Self {
        let mut best_cost = vec![f64::INFINITY; n];
        if let Some(first) = best_cost.first_mut() {
            *first = 0.0;
        }
        Self {
            best_cost,
            predecessor: vec![0; n],
        }
    }

    pub fn best_cost(&self) -> &[f64] {
        &self.best_cost
    }

    pub fn predecessor(&self) -> &[usize] {
        &self.predecessor
    }

    /// Offer the edge `from -> to`. Only a strictly cheaper candidate
    /// replaces the current one, so among equal costs the earliest `from` wins.
    fn relax(&mut self, from: usize, to: usize, edge: f64) -> bool {
        let candidate = self.best_cost[from] + edge;
        if candidate < self.best_cost[to] {
            self.best_cost[to] = candidate;
            self.predecessor[to] = from;
            true
        } else {
            false
        }
    }

    /// Walk the predecessor links back from the last frame.
    ///
    /// Every predecessor is smaller than its frame, so the walk always reaches
    /// frame 0.
    pub fn path(&self) -> Vec<usize> {
        let Some(last) = self.best_cost.len().checked_sub(1) else {
            return Vec::new();
        };

        let mut path = vec![last];
        let mut current = last;
        while current != 0 {
            current = self.predecessor[current];
            path.push(current);
        }
        path.reverse();
        path
    }
}

/// Result of one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedPath {
    /// Chosen frame indices: strictly increasing, from 0 to n - 1.
    pub indices: Vec<usize>,
    /// Sum of pair and velocity costs along the path.
    pub total_cost: f64,
}

impl OptimizedPath {
    /// Number of input frames left out of the path.
    pub fn skipped(&self) -> usize {
        match self.indices.last() {
            Some(&last) => last + 1 - self.indices.len(),
            None => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathOptimizer {
    window_size: usize,
    velocity_factor: f64,
}

impl PathOptimizer {
    pub fn new(window_size: usize, velocity_factor: f64) -> Self {
        Self {
            window_size: window_size.max(1),
            velocity_factor,
        }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::new(config.window_size, config.velocity_factor)
    }

    /// Penalty for jumping from `from` to `to`, zero for adjacent frames.
    pub fn velocity_cost(&self, from: usize, to: usize) -> f64 {
        let skipped = (to - from - 1) as f64;
        self.velocity_factor * skipped * skipped
    }

    /// Run the forward sweep over `n` frames.
    ///
    /// The window of each frame is costed in parallel and then relaxed in
    /// ascending order, which gives exactly the result of the sequential
    /// recurrence.
    pub fn sweep<C>(&self, n: usize, costs: &C) -> OptimizerResult<PathState>
    where
        C: PairCost + ?Sized,
    {
        let mut state = PathState::new(n);

        for from in 0..n.saturating_sub(1) {
            let last = from.saturating_add(self.window_size).min(n - 1);

            let edges = (from + 1..=last)
                .into_par_iter()
                .map(|to| {
                    let visual = costs.cost(from, to)?;
                    if !visual.is_finite() || visual < 0.0 {
                        return Err(OptimizerError::InvalidCost {
                            from,
                            to,
                            cost: visual,
                        });
                    }
                    Ok(visual + self.velocity_cost(from, to))
                })
                .collect::<OptimizerResult<Vec<f64>>>()?;

            for (to, edge) in (from + 1..=last).zip(edges) {
                if state.relax(from, to, edge) {
                    debug!(from, to, cost = state.best_cost[to], "improved");
                }
            }
        }

        Ok(state)
    }

    /// Cheapest path from the first to the last of `n` frames.
    pub fn optimize<C>(&self, n: usize, costs: &C) -> OptimizerResult<OptimizedPath>
    where
        C: PairCost + ?Sized,
    {
        match n {
            0 => return Err(OptimizerError::EmptySequence),
            1 => {
                return Ok(OptimizedPath {
                    indices: vec![0],
                    total_cost: 0.0,
                })
            }
            _ => {}
        }

        let state = self.sweep(n, costs)?;
        let path = OptimizedPath {
            indices: state.path(),
            total_cost: state.best_cost[n - 1],
        };

        info!(
            frames = n,
            kept = path.indices.len(),
            skipped = path.skipped(),
            total_cost = path.total_cost,
            "optimal path found"
        );
        Ok(path)
    }
}
