//! k-nearest-neighbors classifier with a bounded max-heap neighbor search.

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{ChurnError, Result};
use crate::models::{Estimator, ModelArtifact};
use crate::params::ParamValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Euclidean,
    Manhattan,
    Cosine,
}

impl DistanceMetric {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "manhattan" => Ok(DistanceMetric::Manhattan),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(ChurnError::InvalidParameter {
                name: "metric".to_string(),
                value: other.to_string(),
                reason: "expected euclidean, manhattan or cosine".to_string(),
            }),
        }
    }

    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::Manhattan => {
                a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
            }
            DistanceMetric::Cosine => {
                let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
                let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
                let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
        }
    }
}

/// Heap entry ordered by distance so the heap top is the worst neighbor kept.
struct Neighbor {
    dist: f64,
    label: f64,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist
    }
}
impl Eq for Neighbor {}
impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist.partial_cmp(&other.dist).unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnClassifier {
    pub n_neighbors: usize,
    pub metric: DistanceMetric,
    x_train: Option<Array2<f64>>,
    y_train: Option<Array1<f64>>,
}

impl Default for KnnClassifier {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            metric: DistanceMetric::Euclidean,
            x_train: None,
            y_train: None,
        }
    }
}

impl KnnClassifier {
    pub fn new(n_neighbors: usize, metric: DistanceMetric) -> Self {
        Self {
            n_neighbors,
            metric,
            x_train: None,
            y_train: None,
        }
    }

    fn score_row(&self, row: ArrayView1<f64>, x: &Array2<f64>, y: &Array1<f64>) -> f64 {
        let k = self.n_neighbors.min(x.nrows()).max(1);
        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        for i in 0..x.nrows() {
            let dist = self.metric.distance(row, x.row(i));
            heap.push(Neighbor { dist, label: y[i] });
            if heap.len() > k {
                heap.pop();
            }
        }
        let sum: f64 = heap.iter().map(|n| n.label).sum();
        sum / k as f64
    }
}

impl Estimator for KnnClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() == 0 {
            return Err(ChurnError::TrainingError("empty training set".to_string()));
        }
        if x.nrows() != y.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} labels", x.nrows()),
                actual: format!("{} labels", y.len()),
            });
        }
        self.x_train = Some(x.to_owned());
        self.y_train = Some(y.to_owned());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self
            .predict_proba(x)?
            .mapv(|p| if p > 0.5 { 1.0 } else { 0.0 }))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (xt, yt) = match (&self.x_train, &self.y_train) {
            (Some(xt), Some(yt)) => (xt, yt),
            _ => return Err(ChurnError::ModelNotFitted),
        };
        if x.ncols() != xt.ncols() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} features", xt.ncols()),
                actual: format!("{} features", x.ncols()),
            });
        }
        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| self.score_row(x.row(i), xt, yt))
            .collect();
        Ok(Array1::from_vec(scores))
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "n_neighbors" => {
                self.n_neighbors = value
                    .as_usize()
                    .filter(|v| *v >= 1)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 1"))?
            }
            "metric" => {
                let name = value
                    .as_str()
                    .ok_or_else(|| value.type_mismatch("metric", "a metric name"))?;
                self.metric = DistanceMetric::parse(name)?;
            }
            _ => {
                return Err(ChurnError::ConfigError(format!(
                    "unknown knn parameter '{name}'"
                )))
            }
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    fn artifact(&self) -> Result<ModelArtifact> {
        if self.x_train.is_none() {
            return Err(ChurnError::ModelNotFitted);
        }
        Ok(ModelArtifact::Knn(self.clone()))
    }
}
