//! Stratified k-fold splitting for binary targets.

use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ChurnError, Result};
use crate::metrics;

/// One train/test index split.
#[derive(Debug, Clone)]
pub struct CvSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Stratified k-fold splitter.
///
/// Samples are grouped by label, shuffled within each group with a seeded
/// ChaCha8 stream, and dealt round-robin across folds, so every fold keeps
/// the class proportions of the full set and the same seed always produces
/// the same folds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratifiedKFold {
    pub n_splits: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize, seed: u64) -> Self {
        Self {
            n_splits,
            shuffle: true,
            seed,
        }
    }

    pub fn split(&self, y: &Array1<f64>) -> Result<Vec<CvSplit>> {
        if self.n_splits < 2 {
            return Err(ChurnError::ConfigError(
                "stratified k-fold requires at least 2 splits".to_string(),
            ));
        }
        if y.len() < self.n_splits {
            return Err(ChurnError::ValidationError(format!(
                "cannot split {} samples into {} folds",
                y.len(),
                self.n_splits
            )));
        }

        let mut by_class: HashMap<i64, Vec<usize>> = HashMap::new();
        for (i, &label) in y.iter().enumerate() {
            by_class.entry(label.round() as i64).or_default().push(i);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut fold_test: Vec<Vec<usize>> = vec![Vec::new(); self.n_splits];

        // Deterministic class order, then deal each class round-robin.
        let mut classes: Vec<i64> = by_class.keys().copied().collect();
        classes.sort_unstable();
        for class in classes {
            let mut indices = by_class.remove(&class).unwrap_or_default();
            if self.shuffle {
                indices.shuffle(&mut rng);
            }
            for (pos, idx) in indices.into_iter().enumerate() {
                fold_test[pos % self.n_splits].push(idx);
            }
        }

        let splits = fold_test
            .iter()
            .enumerate()
            .map(|(fold_idx, test)| {
                let mut test_indices = test.clone();
                test_indices.sort_unstable();
                let train_indices = fold_test
                    .iter()
                    .enumerate()
                    .filter(|(other, _)| *other != fold_idx)
                    .flat_map(|(_, t)| t.iter().copied())
                    .collect();
                CvSplit {
                    train_indices,
                    test_indices,
                    fold_idx,
                }
            })
            .collect();
        Ok(splits)
    }
}

/// Aggregated fold scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvSummary {
    pub scores: Vec<f64>,
    pub mean: f64,
    pub std: f64,
}

impl CvSummary {
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let mean = metrics::mean(&scores);
        let std = metrics::std_dev(&scores);
        Self { scores, mean, std }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn labels(n_neg: usize, n_pos: usize) -> Array1<f64> {
        let mut v = vec![0.0; n_neg];
        v.extend(std::iter::repeat(1.0).take(n_pos));
        Array1::from(v)
    }

    #[test]
    fn test_folds_partition_all_samples() {
        let y = labels(60, 40);
        let splits = StratifiedKFold::new(5, 7).split(&y).unwrap();
        assert_eq!(splits.len(), 5);
        let mut seen: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        for s in &splits {
            assert_eq!(s.train_indices.len() + s.test_indices.len(), 100);
            assert!(s.train_indices.iter().all(|i| !s.test_indices.contains(i)));
        }
    }

    #[test]
    fn test_class_proportions_preserved() {
        let y = labels(75, 25);
        for split in StratifiedKFold::new(5, 0).split(&y).unwrap() {
            let pos = split.test_indices.iter().filter(|&&i| y[i] > 0.5).count();
            assert_eq!(pos, 5);
            assert_eq!(split.test_indices.len(), 20);
        }
    }

    #[test]
    fn test_same_seed_same_folds() {
        let y = labels(30, 30);
        let a = StratifiedKFold::new(5, 42).split(&y).unwrap();
        let b = StratifiedKFold::new(5, 42).split(&y).unwrap();
        for (sa, sb) in a.iter().zip(&b) {
            assert_eq!(sa.test_indices, sb.test_indices);
        }
        let c = StratifiedKFold::new(5, 43).split(&y).unwrap();
        assert!(a.iter().zip(&c).any(|(sa, sc)| sa.test_indices != sc.test_indices));
    }

    #[test]
    fn test_too_few_samples_rejected() {
        let y = labels(2, 1);
        assert!(StratifiedKFold::new(5, 0).split(&y).is_err());
    }

    #[test]
    fn test_summary_statistics() {
        let s = CvSummary::from_scores(vec![0.5, 0.7, 0.9]);
        assert!((s.mean - 0.7).abs() < 1e-12);
        assert!(s.std > 0.0);
    }
}
