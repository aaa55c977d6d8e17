//! One-dimensional k-means for building weight codebooks.
//!
//! Values are sorted once, so every cluster is a contiguous run and the
//! assignment step is a handful of binary searches over prefix sums.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct KMeans {
    pub k: usize,
    pub max_iter: usize,
    /// Convergence threshold relative to the data variance.
    pub tol: f64,
    pub seed: u64,
}

impl KMeans {
    pub fn new(k: usize, seed: u64) -> Self {
        KMeans {
            k,
            max_iter: 300,
            tol: 1e-4,
            seed,
        }
    }

    /// Returns at most `k` centroids, sorted ascending. When the input has no
    /// more than `k` distinct finite values those values are returned as is.
    pub fn fit(&self, values: &[f32]) -> Vec<f32> {
        let mut sorted: Vec<f64> = values
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| v as f64)
            .collect();
        sorted.sort_by(f64::total_cmp);

        let mut distinct = sorted.clone();
        distinct.dedup();
        if distinct.len() <= self.k {
            return distinct.into_iter().map(|v| v as f32).collect();
        }

        let prefix = prefix_sums(&sorted);
        let n = sorted.len() as f64;
        let mean = prefix[sorted.len()] / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let threshold = self.tol * variance;

        let mut centers = self.init_plus_plus(&sorted);
        for iteration in 0..self.max_iter {
            let updated = lloyd_step(&sorted, &prefix, &centers);
            let shift: f64 = centers
                .iter()
                .zip(updated.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            centers = updated;
            if shift <= threshold {
                tracing::trace!(iteration, shift, "k-means converged");
                break;
            }
        }

        centers.into_iter().map(|v| v as f32).collect()
    }

    /// k-means++ seeding: each new centre is drawn with probability
    /// proportional to its squared distance from the nearest existing one.
    fn init_plus_plus(&self, sorted: &[f64]) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centers = Vec::with_capacity(self.k);
        centers.push(sorted[rng.random_range(0..sorted.len())]);

        let mut closest: Vec<f64> = sorted.iter().map(|v| (v - centers[0]).powi(2)).collect();
        while centers.len() < self.k {
            let total: f64 = closest.iter().sum();
            let next = if total > 0.0 {
                let mut target = rng.random::<f64>() * total;
                // rounding can leave `target` unconsumed; never re-pick a centre
                let mut chosen = closest.iter().rposition(|&d| d > 0.0).unwrap_or(0);
                for (i, d) in closest.iter().enumerate() {
                    if target < *d {
                        chosen = i;
                        break;
                    }
                    target -= d;
                }
                sorted[chosen]
            } else {
                sorted[rng.random_range(0..sorted.len())]
            };

            centers.push(next);
            for (d, v) in closest.iter_mut().zip(sorted.iter()) {
                *d = d.min((v - next).powi(2));
            }
        }

        centers.sort_by(f64::total_cmp);
        centers
    }
}

fn prefix_sums(sorted: &[f64]) -> Vec<f64> {
    let mut prefix = Vec::with_capacity(sorted.len() + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for v in sorted {
        acc += v;
        prefix.push(acc);
    }
    prefix
}

/// Assign every value to its nearest centre and move each centre to the mean
/// of its run. Empty clusters keep their previous position.
fn lloyd_step(sorted: &[f64], prefix: &[f64], centers: &[f64]) -> Vec<f64> {
    let mut updated = Vec::with_capacity(centers.len());
    let mut start = 0;

    for (i, &center) in centers.iter().enumerate() {
        let end = match centers.get(i + 1) {
            Some(&next) => {
                let midpoint = (center + next) / 2.0;
                sorted.partition_point(|&v| v <= midpoint)
            }
            None => sorted.len(),
        };
        let end = end.max(start);

        if end > start {
            updated.push((prefix[end] - prefix[start]) / (end - start) as f64);
        } else {
            updated.push(center);
        }
        start = end;
    }

    updated.sort_by(f64::total_cmp);
    updated
}
