//! Random forest classifier: bootstrap-sampled CART trees built in parallel.

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ChurnError, Result};
use crate::models::decision_tree::{Criterion, DecisionTree};
use crate::models::{Estimator, ModelArtifact};
use crate::params::ParamValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
    trees: Vec<DecisionTree>,
}

impl Default for RandomForestClassifier {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            seed: 0,
            trees: Vec::new(),
        }
    }
}

impl RandomForestClassifier {
    pub fn new(n_estimators: usize, seed: u64) -> Self {
        Self {
            n_estimators,
            seed,
            ..Self::default()
        }
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Estimator for RandomForestClassifier {
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
        if self.n_estimators == 0 {
            return Err(ChurnError::InvalidParameter {
                name: "n_estimators".to_string(),
                value: "0".to_string(),
                reason: "forest needs at least one tree".to_string(),
            });
        }

        let max_features = ((x.ncols() as f64).sqrt().round() as usize).max(1);
        self.trees = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let tree_seed = self.seed.wrapping_add(tree_idx as u64);
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(tree_seed);
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut tree = DecisionTree::new(Criterion::Gini)
                    .with_max_depth(self.max_depth)
                    .with_min_samples_split(self.min_samples_split)
                    .with_min_samples_leaf(self.min_samples_leaf)
                    .with_max_features(Some(max_features))
                    .with_seed(tree_seed);
                tree.fit_indices(x, y, &sample)?;
                Ok(tree)
            })
            .collect::<Result<Vec<_>>>()?;
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
        let mut acc = Array1::<f64>::zeros(x.nrows());
        for tree in &self.trees {
            acc = acc + tree.predict_raw(x)?;
        }
        Ok(acc / self.trees.len() as f64)
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "n_estimators" => {
                self.n_estimators = value
                    .as_usize()
                    .filter(|v| *v >= 1)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 1"))?
            }
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
                    "unknown random forest parameter '{name}'"
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
        Ok(ModelArtifact::RandomForest(self.clone()))
    }
}
