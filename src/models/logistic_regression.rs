//! Logistic regression with L1/L2 penalties, trained by gradient descent.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{ChurnError, Result};
use crate::models::{ModelArtifact, Estimator};
use crate::params::ParamValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Penalty {
    L1,
    L2,
}

/// Binary logistic regression classifier.
///
/// `c` is the inverse regularization strength, so smaller values regularize
/// harder. L1 is applied with a soft-threshold step after each gradient
/// update, L2 directly through the gradient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub penalty: Penalty,
    pub c: f64,
    pub fit_intercept: bool,
    pub max_iter: usize,
    pub learning_rate: f64,
    pub tol: f64,
    weights: Option<Array1<f64>>,
    intercept: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            penalty: Penalty::L2,
            c: 1.0,
            fit_intercept: true,
            max_iter: 500,
            learning_rate: 0.1,
            tol: 1e-6,
            weights: None,
            intercept: 0.0,
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

impl LogisticRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_penalty(mut self, penalty: Penalty) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    fn check_input(&self, x: &Array2<f64>) -> Result<&Array1<f64>> {
        let weights = self.weights.as_ref().ok_or(ChurnError::ModelNotFitted)?;
        if x.ncols() != weights.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} features", weights.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(weights)
    }

    fn decision(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let weights = self.check_input(x)?;
        Ok(x.dot(weights) + self.intercept)
    }
}

impl Estimator for LogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 {
            return Err(ChurnError::TrainingError("empty training set".to_string()));
        }
        if y.len() != n_samples {
            return Err(ChurnError::ShapeError {
                expected: format!("{n_samples} labels"),
                actual: format!("{} labels", y.len()),
            });
        }
        if self.c <= 0.0 {
            return Err(ChurnError::InvalidParameter {
                name: "c".to_string(),
                value: self.c.to_string(),
                reason: "inverse regularization strength must be positive".to_string(),
            });
        }

        let n = n_samples as f64;
        let reg = 1.0 / (self.c * n);
        let mut weights = Array1::<f64>::zeros(n_features);
        let mut intercept = 0.0;

        for _ in 0..self.max_iter {
            let z = x.dot(&weights) + intercept;
            let probs = z.mapv(sigmoid);
            let err = &probs - y;
            let mut grad = x.t().dot(&err) / n;
            if self.penalty == Penalty::L2 {
                grad = grad + &(&weights * reg);
            }

            weights = weights - &(&grad * self.learning_rate);
            if self.penalty == Penalty::L1 {
                let shrink = self.learning_rate * reg;
                weights.mapv_inplace(|w| {
                    if w > shrink {
                        w - shrink
                    } else if w < -shrink {
                        w + shrink
                    } else {
                        0.0
                    }
                });
            }
            if self.fit_intercept {
                intercept -= self.learning_rate * err.sum() / n;
            }

            let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
            if grad_norm < self.tol {
                break;
            }
        }

        self.weights = Some(weights);
        self.intercept = intercept;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self
            .predict_proba(x)?
            .mapv(|p| if p > 0.5 { 1.0 } else { 0.0 }))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.decision(x)?.mapv(sigmoid))
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "penalty" => {
                self.penalty = match value.as_str() {
                    Some("l1") => Penalty::L1,
                    Some("l2") => Penalty::L2,
                    _ => return Err(value.type_mismatch(name, "'l1' or 'l2'")),
                }
            }
            "c" => {
                self.c = value
                    .as_f64()
                    .filter(|v| *v > 0.0)
                    .ok_or_else(|| value.type_mismatch(name, "a positive float"))?
            }
            "fit_intercept" => {
                self.fit_intercept = value
                    .as_bool()
                    .ok_or_else(|| value.type_mismatch(name, "a bool"))?
            }
            "max_iter" => {
                self.max_iter = value
                    .as_usize()
                    .ok_or_else(|| value.type_mismatch(name, "a non-negative int"))?
            }
            "learning_rate" => {
                self.learning_rate = value
                    .as_f64()
                    .ok_or_else(|| value.type_mismatch(name, "a float"))?
            }
            "tol" => {
                self.tol = value
                    .as_f64()
                    .ok_or_else(|| value.type_mismatch(name, "a float"))?
            }
            _ => {
                return Err(ChurnError::ConfigError(format!(
                    "unknown logistic regression parameter '{name}'"
                )))
            }
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    fn artifact(&self) -> Result<ModelArtifact> {
        if self.weights.is_none() {
            return Err(ChurnError::ModelNotFitted);
        }
        Ok(ModelArtifact::LogisticRegression(self.clone()))
    }
}
