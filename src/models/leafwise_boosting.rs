//! Gradient boosting with best-first (leaf-wise) tree growth.
//!
//! Each tree starts as a single leaf and repeatedly splits the leaf with the
//! highest regularized gain, pulled from a priority queue, until `num_leaves`
//! is reached or no leaf improves. Leaf values are Newton steps
//! `-G / (H + lambda)` from per-sample gradients and hessians of the
//! binary log-loss.

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{ChurnError, Result};
use crate::models::{Estimator, ModelArtifact};
use crate::params::ParamValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    feature: usize,
    threshold: f64,
    left: Option<usize>,
    right: Option<usize>,
    value: f64,
    depth: usize,
}

impl Node {
    fn leaf(value: f64, depth: usize) -> Self {
        Self {
            feature: 0,
            threshold: 0.0,
            left: None,
            right: None,
            value,
            depth,
        }
    }

    fn is_leaf(&self) -> bool {
        self.left.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeafwiseTree {
    nodes: Vec<Node>,
}

impl LeafwiseTree {
    fn predict_one(&self, row: ndarray::ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            let next = if row[node.feature] <= node.threshold {
                node.left
            } else {
                node.right
            };
            match next {
                Some(child) => idx = child,
                None => return node.value,
            }
        }
    }
}

/// A candidate split of one leaf, ordered by gain.
struct PendingSplit {
    gain: f64,
    node: usize,
    feature: usize,
    threshold: f64,
    left_rows: Vec<usize>,
    right_rows: Vec<usize>,
}

impl PartialEq for PendingSplit {
    fn eq(&self, other: &Self) -> bool {
        self.gain == other.gain
    }
}
impl Eq for PendingSplit {}
impl PartialOrd for PendingSplit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingSplit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gain.partial_cmp(&other.gain).unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafwiseBoostedClassifier {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub max_depth: usize,
    pub min_child_samples: usize,
    pub reg_lambda: f64,
    pub seed: u64,
    init_score: f64,
    trees: Vec<LeafwiseTree>,
}

impl Default for LeafwiseBoostedClassifier {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            num_leaves: 31,
            max_depth: 6,
            min_child_samples: 20,
            reg_lambda: 0.0,
            seed: 0,
            init_score: 0.0,
            trees: Vec::new(),
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl LeafwiseBoostedClassifier {
    pub fn new(n_estimators: usize, num_leaves: usize, seed: u64) -> Self {
        Self {
            n_estimators,
            num_leaves,
            seed,
            ..Self::default()
        }
    }

    fn leaf_value(&self, g_sum: f64, h_sum: f64) -> f64 {
        -g_sum / (h_sum + self.reg_lambda + 1e-12)
    }

    fn split_score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.reg_lambda + 1e-12)
    }

    fn best_split(
        &self,
        x: &Array2<f64>,
        grad: &Array1<f64>,
        hess: &Array1<f64>,
        node: usize,
        rows: &[usize],
    ) -> Option<PendingSplit> {
        if rows.len() < 2 * self.min_child_samples {
            return None;
        }
        let g_total: f64 = rows.iter().map(|&i| grad[i]).sum();
        let h_total: f64 = rows.iter().map(|&i| hess[i]).sum();
        let parent_score = self.split_score(g_total, h_total);

        let per_feature = (0..x.ncols())
            .into_par_iter()
            .filter_map(|feature| {
                let mut order: Vec<usize> = rows.to_vec();
                order.sort_by(|&a, &b| {
                    x[[a, feature]]
                        .partial_cmp(&x[[b, feature]])
                        .unwrap_or(Ordering::Equal)
                });
                let mut gl = 0.0;
                let mut hl = 0.0;
                let mut best: Option<(f64, f64, usize)> = None;
                for i in 0..order.len() - 1 {
                    gl += grad[order[i]];
                    hl += hess[order[i]];
                    if x[[order[i], feature]] == x[[order[i + 1], feature]] {
                        continue;
                    }
                    let n_left = i + 1;
                    let n_right = order.len() - n_left;
                    if n_left < self.min_child_samples || n_right < self.min_child_samples {
                        continue;
                    }
                    let gain = self.split_score(gl, hl)
                        + self.split_score(g_total - gl, h_total - hl)
                        - parent_score;
                    if gain > 1e-12 && best.map_or(true, |(bg, _, _)| gain > bg) {
                        let threshold = (x[[order[i], feature]] + x[[order[i + 1], feature]]) / 2.0;
                        best = Some((gain, threshold, i + 1));
                    }
                }
                best.map(|(gain, threshold, split_at)| (gain, feature, threshold, order, split_at))
            })
            .reduce_with(|a, b| if a.0 >= b.0 { a } else { b });

        per_feature.map(|(gain, feature, threshold, order, split_at)| PendingSplit {
            gain,
            node,
            feature,
            threshold,
            left_rows: order[..split_at].to_vec(),
            right_rows: order[split_at..].to_vec(),
        })
    }

    fn grow_tree(
        &self,
        x: &Array2<f64>,
        grad: &Array1<f64>,
        hess: &Array1<f64>,
    ) -> LeafwiseTree {
        let all_rows: Vec<usize> = (0..x.nrows()).collect();
        let g: f64 = grad.sum();
        let h: f64 = hess.sum();
        let mut tree = LeafwiseTree {
            nodes: vec![Node::leaf(self.leaf_value(g, h), 0)],
        };

        let mut heap = BinaryHeap::new();
        if let Some(split) = self.best_split(x, grad, hess, 0, &all_rows) {
            heap.push(split);
        }

        let mut n_leaves = 1;
        while n_leaves < self.num_leaves.max(2) {
            let Some(split) = heap.pop() else { break };
            let depth = tree.nodes[split.node].depth;

            let left_idx = tree.nodes.len();
            let right_idx = left_idx + 1;
            let gl: f64 = split.left_rows.iter().map(|&i| grad[i]).sum();
            let hl: f64 = split.left_rows.iter().map(|&i| hess[i]).sum();
            let gr: f64 = split.right_rows.iter().map(|&i| grad[i]).sum();
            let hr: f64 = split.right_rows.iter().map(|&i| hess[i]).sum();
            tree.nodes
                .push(Node::leaf(self.leaf_value(gl, hl), depth + 1));
            tree.nodes
                .push(Node::leaf(self.leaf_value(gr, hr), depth + 1));
            {
                let parent = &mut tree.nodes[split.node];
                parent.feature = split.feature;
                parent.threshold = split.threshold;
                parent.left = Some(left_idx);
                parent.right = Some(right_idx);
            }
            n_leaves += 1;

            if depth + 1 < self.max_depth {
                if let Some(s) = self.best_split(x, grad, hess, left_idx, &split.left_rows) {
                    heap.push(s);
                }
                if let Some(s) = self.best_split(x, grad, hess, right_idx, &split.right_rows) {
                    heap.push(s);
                }
            }
        }
        tree
    }
}

impl Estimator for LeafwiseBoostedClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n = x.nrows();
        if n == 0 {
            return Err(ChurnError::TrainingError("empty training set".to_string()));
        }
        if y.len() != n {
            return Err(ChurnError::ShapeError {
                expected: format!("{n} labels"),
                actual: format!("{} labels", y.len()),
            });
        }
        if self.num_leaves < 2 {
            return Err(ChurnError::InvalidParameter {
                name: "num_leaves".to_string(),
                value: self.num_leaves.to_string(),
                reason: "a tree needs at least 2 leaves".to_string(),
            });
        }

        let pos = y.iter().filter(|&&v| v > 0.5).count() as f64;
        let rate = (pos / n as f64).clamp(1e-6, 1.0 - 1e-6);
        self.init_score = (rate / (1.0 - rate)).ln();

        let mut scores = Array1::<f64>::from_elem(n, self.init_score);
        self.trees = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            let probs = scores.mapv(sigmoid);
            let grad = &probs - y;
            let hess = probs.mapv(|p| (p * (1.0 - p)).max(1e-12));

            let tree = self.grow_tree(x, &grad, &hess);
            for i in 0..n {
                scores[i] += self.learning_rate * tree.predict_one(x.row(i));
            }
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self
            .predict_proba(x)?
            .mapv(|p| if p > 0.5 { 1.0 } else { 0.0 }))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(ChurnError::ModelNotFitted);
        }
        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let mut s = self.init_score;
                for tree in &self.trees {
                    s += self.learning_rate * tree.predict_one(row);
                }
                sigmoid(s)
            })
            .collect();
        Ok(Array1::from_vec(scores))
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "n_estimators" => {
                self.n_estimators = value
                    .as_usize()
                    .filter(|v| *v >= 1)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 1"))?
            }
            "learning_rate" => {
                self.learning_rate = value
                    .as_f64()
                    .filter(|v| *v > 0.0)
                    .ok_or_else(|| value.type_mismatch(name, "a positive float"))?
            }
            "num_leaves" => {
                self.num_leaves = value
                    .as_usize()
                    .filter(|v| *v >= 2)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 2"))?
            }
            "max_depth" => {
                self.max_depth = value
                    .as_usize()
                    .filter(|v| *v >= 1)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 1"))?
            }
            "min_child_samples" => {
                self.min_child_samples = value
                    .as_usize()
                    .filter(|v| *v >= 1)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 1"))?
            }
            "reg_lambda" => {
                self.reg_lambda = value
                    .as_f64()
                    .filter(|v| *v >= 0.0)
                    .ok_or_else(|| value.type_mismatch(name, "a non-negative float"))?
            }
            _ => {
                return Err(ChurnError::ConfigError(format!(
                    "unknown leafwise boosting parameter '{name}'"
                )))
            }
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    fn artifact(&self) -> Result<ModelArtifact> {
        if self.trees.is_empty() {
            return Err(ChurnError::ModelNotFitted);
        }
        Ok(ModelArtifact::LeafwiseBoosted(self.clone()))
    }
}
