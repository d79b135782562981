use crate::brief::descriptor_distance;
use crate::features::Correspondence;

/// An accepted descriptor match between a query and a train set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    pub query: usize,
    pub train: usize,
    pub distance: f64,
}

/// Brute-force two-nearest-neighbour matching with the ratio test.
///
/// A query is kept only if its nearest train descriptor is closer than
/// `ratio` times the second nearest, which rejects ambiguous matches as well
/// as weak ones. With fewer than two train descriptors the ratio cannot be
/// formed and nothing is matched. Equal distances keep the lower train index.
pub fn ratio_test_matches(
    query: &[Correspondence],
    train: &[Correspondence],
    ratio: f64,
) -> Vec<DescriptorMatch> {
    if train.len() < 2 {
        return Vec::new();
    }

    query
        .iter()
        .enumerate()
        .filter_map(|(query_idx, q)| {
            let mut best: Option<(usize, f64)> = None;
            let mut second = f64::INFINITY;

            for (train_idx, t) in train.iter().enumerate() {
                let distance = descriptor_distance(&q.descriptor, &t.descriptor);
                match best {
                    Some((_, best_dist)) if distance >= best_dist => {
                        if distance < second {
                            second = distance;
                        }
                    }
                    Some((_, best_dist)) => {
                        second = best_dist;
                        best = Some((train_idx, distance));
                    }
                    None => best = Some((train_idx, distance)),
                }
            }

            let (train_idx, distance) = best?;
            (distance < ratio * second).then_some(DescriptorMatch {
                query: query_idx,
                train: train_idx,
                distance,
            })
        })
        .collect()
}
