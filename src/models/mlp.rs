//! Feedforward network for tabular data: ReLU hidden layers, sigmoid output,
//! minibatch SGD with momentum.

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::error::{ChurnError, Result};
use crate::models::{Estimator, ModelArtifact};
use crate::params::ParamValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpClassifier {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub momentum: f64,
    pub max_epochs: usize,
    pub batch_size: usize,
    /// L2 weight decay.
    pub alpha: f64,
    pub seed: u64,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
}

impl Default for MlpClassifier {
    fn default() -> Self {
        Self {
            hidden_layers: vec![64, 32],
            learning_rate: 0.01,
            momentum: 0.9,
            max_epochs: 200,
            batch_size: 32,
            alpha: 1e-4,
            seed: 0,
            weights: Vec::new(),
            biases: Vec::new(),
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

impl MlpClassifier {
    pub fn new(hidden_layers: Vec<usize>, seed: u64) -> Self {
        Self {
            hidden_layers,
            seed,
            ..Self::default()
        }
    }

    fn layer_sizes(&self, n_features: usize) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.hidden_layers.len() + 2);
        sizes.push(n_features);
        sizes.extend(self.hidden_layers.iter().copied());
        sizes.push(1);
        sizes
    }

    fn init_layers(&mut self, n_features: usize, rng: &mut Xoshiro256PlusPlus) {
        let sizes = self.layer_sizes(n_features);
        self.weights.clear();
        self.biases.clear();
        for pair in sizes.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            // Xavier uniform
            let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
            let w = Array2::from_shape_fn((fan_in, fan_out), |_| rng.gen_range(-bound..bound));
            self.weights.push(w);
            self.biases.push(Array1::zeros(fan_out));
        }
    }

    /// Forward pass keeping pre- and post-activation values for backprop.
    fn forward(&self, input: &Array2<f64>) -> (Vec<Array2<f64>>, Array1<f64>) {
        let n_layers = self.weights.len();
        let mut activations = vec![input.to_owned()];
        for (l, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            let mut z = activations[l].dot(w);
            z += b;
            if l + 1 < n_layers {
                z.mapv_inplace(|v| v.max(0.0));
            }
            activations.push(z);
        }
        let logits = activations[n_layers].column(0).to_owned();
        (activations, logits.mapv(sigmoid))
    }
}

impl Estimator for MlpClassifier {
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
        if self.hidden_layers.is_empty() {
            return Err(ChurnError::ConfigError(
                "deep tabular model needs at least one hidden layer".to_string(),
            ));
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        self.init_layers(x.ncols(), &mut rng);
        let mut vel_w: Vec<Array2<f64>> =
            self.weights.iter().map(|w| Array2::zeros(w.dim())).collect();
        let mut vel_b: Vec<Array1<f64>> =
            self.biases.iter().map(|b| Array1::zeros(b.len())).collect();

        let batch = self.batch_size.clamp(1, n);
        let mut order: Vec<usize> = (0..n).collect();
        for _ in 0..self.max_epochs {
            order.shuffle(&mut rng);
            for chunk in order.chunks(batch) {
                let xb = x.select(Axis(0), chunk);
                let yb = Array1::from_iter(chunk.iter().map(|&i| y[i]));
                let m = chunk.len() as f64;

                let (activations, probs) = self.forward(&xb);
                // output delta for BCE with a sigmoid head is (p - y)
                let mut delta = (&probs - &yb)
                    .insert_axis(Axis(1))
                    .mapv(|v| v / m);

                for l in (0..self.weights.len()).rev() {
                    let grad_w = activations[l].t().dot(&delta) + &(&self.weights[l] * self.alpha);
                    let grad_b = delta.sum_axis(Axis(0));

                    if l > 0 {
                        let mut back = delta.dot(&self.weights[l].t());
                        back.zip_mut_with(&activations[l], |d, &a| {
                            if a <= 0.0 {
                                *d = 0.0;
                            }
                        });
                        delta = back;
                    }

                    vel_w[l] = &vel_w[l] * self.momentum - &(&grad_w * self.learning_rate);
                    vel_b[l] = &vel_b[l] * self.momentum - &(&grad_b * self.learning_rate);
                    self.weights[l] = &self.weights[l] + &vel_w[l];
                    self.biases[l] = &self.biases[l] + &vel_b[l];
                }
            }
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self
            .predict_proba(x)?
            .mapv(|p| if p > 0.5 { 1.0 } else { 0.0 }))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.weights.is_empty() {
            return Err(ChurnError::ModelNotFitted);
        }
        if x.ncols() != self.weights[0].nrows() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} features", self.weights[0].nrows()),
                actual: format!("{} features", x.ncols()),
            });
        }
        let (_, probs) = self.forward(x);
        Ok(probs)
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "hidden_size" => {
                let h = value
                    .as_usize()
                    .filter(|v| *v >= 1)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 1"))?;
                self.hidden_layers = vec![h];
            }
            "learning_rate" => {
                self.learning_rate = value
                    .as_f64()
                    .filter(|v| *v > 0.0)
                    .ok_or_else(|| value.type_mismatch(name, "a positive float"))?
            }
            "momentum" => {
                self.momentum = value
                    .as_f64()
                    .filter(|v| (0.0..1.0).contains(v))
                    .ok_or_else(|| value.type_mismatch(name, "a float in [0, 1)"))?
            }
            "max_epochs" => {
                self.max_epochs = value
                    .as_usize()
                    .filter(|v| *v >= 1)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 1"))?
            }
            "batch_size" => {
                self.batch_size = value
                    .as_usize()
                    .filter(|v| *v >= 1)
                    .ok_or_else(|| value.type_mismatch(name, "an int >= 1"))?
            }
            "alpha" => {
                self.alpha = value
                    .as_f64()
                    .filter(|v| *v >= 0.0)
                    .ok_or_else(|| value.type_mismatch(name, "a non-negative float"))?
            }
            _ => {
                return Err(ChurnError::ConfigError(format!(
                    "unknown deep tabular parameter '{name}'"
                )))
            }
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    fn artifact(&self) -> Result<ModelArtifact> {
        if self.weights.is_empty() {
            return Err(ChurnError::ModelNotFitted);
        }
        Ok(ModelArtifact::DeepTabular(self.clone()))
    }
}
