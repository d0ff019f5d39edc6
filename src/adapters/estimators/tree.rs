//! CART regression tree (variance reduction).
//!
//! Used directly as the base learner of the forest and boosting ensembles.
//! Nodes live in an arena; children are indices into it.

use ndarray::{ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::ports::EstimatorError;

/// How split thresholds are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Splitter {
    /// Exhaustive search over midpoints between sorted distinct values.
    Best,
    /// One uniform random threshold per feature (extremely randomized trees).
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all.
    pub max_features: Option<usize>,
    pub splitter: Splitter,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            splitter: Splitter::Best,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_features: usize,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

struct Builder<'x, 'y, 'p> {
    x: ArrayView2<'x, f64>,
    y: ArrayView1<'y, f64>,
    params: &'p TreeParams,
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Fit on the rows listed in `indices` (duplicates allowed, for bootstrap
    /// and weighted resampling).
    ///
    /// # Errors
    /// Returns [`EstimatorError::InvalidInput`] when `indices` is empty.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        indices: &[usize],
        params: &TreeParams,
        rng: &mut ChaCha20Rng,
    ) -> Result<Self, EstimatorError> {
        if indices.is_empty() {
            return Err(EstimatorError::InvalidInput("no samples for tree".to_string()));
        }
        let mut builder = Builder {
            x,
            y,
            params,
            nodes: Vec::new(),
        };
        let mut idx = indices.to_vec();
        builder.grow(&mut idx, 0, rng);
        Ok(Self {
            nodes: builder.nodes,
            n_features: x.ncols(),
        })
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Predict a single row. The caller guarantees the width.
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    i = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

impl Builder<'_, '_, '_> {
    fn grow(&mut self, idx: &mut [usize], depth: usize, rng: &mut ChaCha20Rng) -> usize {
        let n = idx.len();
        let sum: f64 = idx.iter().map(|&i| self.y[i]).sum();
        let mean = sum / n as f64;

        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        let pure = idx.iter().all(|&i| (self.y[i] - mean).abs() < 1e-12);
        if depth_reached || pure || n < self.params.min_samples_split.max(2) {
            return self.leaf(mean);
        }

        let Some(split) = self.best_split(idx, sum, rng) else {
            return self.leaf(mean);
        };

        let mid = partition(idx, |i| self.x[[i, split.feature]] <= split.threshold);
        if mid == 0 || mid == n {
            return self.leaf(mean);
        }

        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });
        let (left_idx, right_idx) = idx.split_at_mut(mid);
        let left = self.grow(left_idx, depth + 1, rng);
        let right = self.grow(right_idx, depth + 1, rng);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn leaf(&mut self, value: f64) -> usize {
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    fn candidate_features(&self, rng: &mut ChaCha20Rng) -> Vec<usize> {
        let d = self.x.ncols();
        let mut features: Vec<usize> = (0..d).collect();
        if let Some(k) = self.params.max_features {
            if k < d {
                features.shuffle(rng);
                features.truncate(k.max(1));
            }
        }
        features
    }

    /// Highest `sum_l^2/n_l + sum_r^2/n_r` (equivalent to largest SSE reduction).
    fn best_split(
        &self,
        idx: &[usize],
        total: f64,
        rng: &mut ChaCha20Rng,
    ) -> Option<SplitCandidate> {
        let n = idx.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        if n < 2 * min_leaf {
            return None;
        }
        let parent = total * total / n as f64;
        let mut best: Option<SplitCandidate> = None;

        for feature in self.candidate_features(rng) {
            let candidate = match self.params.splitter {
                Splitter::Best => self.scan_feature(idx, feature, total, min_leaf),
                Splitter::Random => self.random_threshold(idx, feature, min_leaf, rng),
            };
            if let Some(c) = candidate {
                if c.score > parent + 1e-12 && best.as_ref().map_or(true, |b| c.score > b.score) {
                    best = Some(c);
                }
            }
        }
        best
    }

    fn scan_feature(
        &self,
        idx: &[usize],
        feature: usize,
        total: f64,
        min_leaf: usize,
    ) -> Option<SplitCandidate> {
        let n = idx.len();
        let mut pairs: Vec<(f64, f64)> = idx
            .iter()
            .map(|&i| (self.x[[i, feature]], self.y[i]))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut best: Option<SplitCandidate> = None;
        let mut left_sum = 0.0;
        for k in 0..n - 1 {
            left_sum += pairs[k].1;
            let n_left = k + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            if pairs[k].0 == pairs[k + 1].0 {
                continue;
            }
            let right_sum = total - left_sum;
            let score =
                left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64;
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: (pairs[k].0 + pairs[k + 1].0) / 2.0,
                    score,
                });
            }
        }
        best
    }

    fn random_threshold(
        &self,
        idx: &[usize],
        feature: usize,
        min_leaf: usize,
        rng: &mut ChaCha20Rng,
    ) -> Option<SplitCandidate> {
        let (lo, hi) = idx.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            let v = self.x[[i, feature]];
            (lo.min(v), hi.max(v))
        });
        if hi <= lo {
            return None;
        }
        let threshold = rng.gen_range(lo..hi);

        let (mut n_left, mut left_sum, mut right_sum) = (0usize, 0.0, 0.0);
        for &i in idx {
            if self.x[[i, feature]] <= threshold {
                n_left += 1;
                left_sum += self.y[i];
            } else {
                right_sum += self.y[i];
            }
        }
        let n_right = idx.len() - n_left;
        if n_left < min_leaf || n_right < min_leaf {
            return None;
        }
        Some(SplitCandidate {
            feature,
            threshold,
            score: left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64,
        })
    }
}

/// In-place partition; returns the count of elements satisfying `pred`.
fn partition(idx: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for k in 0..idx.len() {
        if pred(idx[k]) {
            idx.swap(mid, k);
            mid += 1;
        }
    }
    mid
}
