//! CART decision tree, the building block for the forest and the classic
//! boosted ensemble.

use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ChurnError, Result};
use crate::models::{Estimator, ModelArtifact};
use crate::params::ParamValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// Split quality criterion. `Gini` treats `y` as binary labels, `Mse` treats
/// `y` as a continuous response (residual regression in boosting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    Gini,
    Mse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Number of features examined per split; `None` means all.
    pub max_features: Option<usize>,
    pub seed: u64,
    root: Option<TreeNode>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            seed: 0,
            root: None,
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl DecisionTree {
    pub fn new(criterion: Criterion) -> Self {
        Self {
            criterion,
            ..Self::default()
        }
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_min_samples_split(mut self, n: usize) -> Self {
        self.min_samples_split = n;
        self
    }

    pub fn with_min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n;
        self
    }

    pub fn with_max_features(mut self, n: Option<usize>) -> Self {
        self.max_features = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn impurity(&self, sum: f64, sum_sq: f64, n: f64) -> f64 {
        match self.criterion {
            Criterion::Gini => {
                let p = sum / n;
                2.0 * p * (1.0 - p)
            }
            Criterion::Mse => {
                let mean = sum / n;
                (sum_sq / n - mean * mean).max(0.0)
            }
        }
    }

    fn best_split_for_feature(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        feature: usize,
    ) -> Option<BestSplit> {
        let mut pairs: Vec<(f64, f64)> = indices.iter().map(|&i| (x[[i, feature]], y[i])).collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let n = pairs.len() as f64;
        let total_sum: f64 = pairs.iter().map(|p| p.1).sum();
        let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();
        let parent = self.impurity(total_sum, total_sq, n);

        let mut best: Option<BestSplit> = None;
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for i in 0..pairs.len() - 1 {
            left_sum += pairs[i].1;
            left_sq += pairs[i].1 * pairs[i].1;
            // no threshold exists between equal values
            if pairs[i].0 == pairs[i + 1].0 {
                continue;
            }
            let n_left = i + 1;
            let n_right = pairs.len() - n_left;
            if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                continue;
            }
            let left_imp = self.impurity(left_sum, left_sq, n_left as f64);
            let right_imp =
                self.impurity(total_sum - left_sum, total_sq - left_sq, n_right as f64);
            let weighted = (n_left as f64 * left_imp + n_right as f64 * right_imp) / n;
            let gain = parent - weighted;
            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(BestSplit {
                    feature,
                    threshold: (pairs[i].0 + pairs[i + 1].0) / 2.0,
                    gain,
                });
            }
        }
        best
    }

    fn build(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        depth: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> TreeNode {
        let n = indices.len();
        let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / n as f64;

        let depth_reached = self.max_depth.map_or(false, |d| depth >= d);
        if depth_reached || n < self.min_samples_split || n < 2 * self.min_samples_leaf {
            return TreeNode::Leaf { value: mean };
        }

        let mut features: Vec<usize> = (0..x.ncols()).collect();
        if let Some(k) = self.max_features {
            features.shuffle(rng);
            features.truncate(k.max(1).min(x.ncols()));
        }

        let best = features
            .par_iter()
            .filter_map(|&f| self.best_split_for_feature(x, y, indices, f))
            .reduce_with(|a, b| if a.gain >= b.gain { a } else { b });

        let Some(split) = best else {
            return TreeNode::Leaf { value: mean };
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);

        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.build(x, y, &left_idx, depth + 1, rng)),
            right: Box::new(self.build(x, y, &right_idx, depth + 1, rng)),
        }
    }

    /// Fit on a subset of rows. Used by the forest for bootstrap samples.
    pub fn fit_indices(&mut self, x: &Array2<f64>, y: &Array1<f64>, indices: &[usize]) -> Result<()> {
        if indices.is_empty() {
            return Err(ChurnError::TrainingError("empty training set".to_string()));
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        self.root = Some(self.build(x, y, indices, 0, &mut rng));
        Ok(())
    }

    /// Raw leaf outputs: class-1 fraction under `Gini`, mean response under
    /// `Mse`.
    pub fn predict_raw(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(ChurnError::ModelNotFitted)?;
        let out = (0..x.nrows())
            .map(|i| {
                let mut node = root;
                loop {
                    match node {
                        TreeNode::Leaf { value } => return *value,
                        TreeNode::Split {
                            feature,
                            threshold,
                            left,
                            right,
                        } => {
                            node = if x[[i, *feature]] <= *threshold {
                                left
                            } else {
                                right
                            };
                        }
                    }
                }
            })
            .collect();
        Ok(Array1::from_vec(out))
    }
}

impl Estimator for DecisionTree {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} labels", x.nrows()),
                actual: format!("{} labels", y.len()),
            });
        }
        let indices: Vec<usize> = (0..x.nrows()).collect();
        self.fit_indices(x, y, &indices)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self
            .predict_raw(x)?
            .mapv(|p| if p > 0.5 { 1.0 } else { 0.0 }))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.predict_raw(x)
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "max_depth" => {
                self.max_depth = Some(
                    value
                        .as_usize()
                        .ok_or_else(|| value.type_mismatch(name, "a non-negative int"))?,
                )
            }
            "min_samples_split" => {
                self.min_samples_split = value
                    .as_usize()
                    .filter(|v| *v >= 2)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 2"))?
            }
            "min_samples_leaf" => {
                self.min_samples_leaf = value
                    .as_usize()
                    .filter(|v| *v >= 1)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 1"))?
            }
            _ => {
                return Err(ChurnError::ConfigError(format!(
                    "unknown decision tree parameter '{name}'"
                )))
            }
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    fn artifact(&self) -> Result<ModelArtifact> {
        if self.root.is_none() {
            return Err(ChurnError::ModelNotFitted);
        }
        Ok(ModelArtifact::DecisionTree(self.clone()))
    }
}
