//! Training pipeline: named feature transforms ahead of a single model stage.

use ndarray::{Array1, Array2};

use crate::error::{ChurnError, Result};
use crate::models::{Estimator, ModelArtifact};
use crate::params;
use crate::params::{Candidate, ParamValue};

/// Name of the model stage; hyperparameter grids target it as
/// `model__<param>`.
pub const MODEL_STAGE: &str = "model";

/// A fit/transform feature stage.
pub trait Transform: Send + Sync {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()>;

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    fn clone_box(&self) -> Box<dyn Transform>;
}

impl Clone for Box<dyn Transform> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// An ordered sequence of feature transforms terminated by exactly one model.
///
/// A pipeline is assembled once, by [`TrainingPipeline::assemble`]; there is
/// no way to append further stages afterwards, so "model added twice" cannot
/// be expressed.
pub struct TrainingPipeline {
    stages: Vec<(String, Box<dyn Transform>)>,
    model: Box<dyn Estimator>,
}

impl Clone for TrainingPipeline {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            model: self.model.clone_box(),
        }
    }
}

impl TrainingPipeline {
    /// Build a pipeline from feature stages and the final model.
    ///
    /// Stage names must be unique, non-empty, free of the `__` namespace
    /// separator, and distinct from the reserved model stage name.
    pub fn assemble(
        stages: Vec<(String, Box<dyn Transform>)>,
        model: Box<dyn Estimator>,
    ) -> Result<Self> {
        for (i, (name, _)) in stages.iter().enumerate() {
            if name.is_empty() {
                return Err(ChurnError::ConfigError(
                    "pipeline stage names must be non-empty".to_string(),
                ));
            }
            if name.contains(params::NAMESPACE_SEP) {
                return Err(ChurnError::ConfigError(format!(
                    "stage name '{name}' must not contain '{}'",
                    params::NAMESPACE_SEP
                )));
            }
            if name == MODEL_STAGE {
                return Err(ChurnError::ConfigError(format!(
                    "stage name '{MODEL_STAGE}' is reserved for the model"
                )));
            }
            if stages[..i].iter().any(|(other, _)| other == name) {
                return Err(ChurnError::ConfigError(format!(
                    "duplicate pipeline stage '{name}'"
                )));
            }
        }
        Ok(Self { stages, model })
    }

    /// Pipeline with no feature stages, just the model.
    pub fn from_model(model: Box<dyn Estimator>) -> Self {
        Self {
            stages: Vec::new(),
            model,
        }
    }

    /// Copy of this pipeline with the same (possibly fitted) feature stages
    /// but a different model.
    pub fn with_model(&self, model: Box<dyn Estimator>) -> Self {
        Self {
            stages: self.stages.clone(),
            model,
        }
    }

    /// Route a namespaced parameter to its stage. Only the model stage
    /// carries tunable parameters; unknown stages or parameters fail fast.
    pub fn set_param(&mut self, key: &str, value: &ParamValue) -> Result<()> {
        let (stage, param) = params::split_key(key)?;
        if stage == MODEL_STAGE {
            return self.model.set_param(param, value);
        }
        if self.stages.iter().any(|(name, _)| name == stage) {
            return Err(ChurnError::ConfigError(format!(
                "stage '{stage}' has no tunable parameters (key '{key}')"
            )));
        }
        Err(ChurnError::ConfigError(format!(
            "unknown pipeline stage '{stage}' in grid key '{key}'"
        )))
    }

    pub fn set_params(&mut self, candidate: &Candidate) -> Result<()> {
        for (key, value) in candidate {
            self.set_param(key, value)?;
        }
        Ok(())
    }

    fn transform_features(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let mut data = x.to_owned();
        for (_, stage) in &self.stages {
            data = stage.transform(&data)?;
        }
        Ok(data)
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let mut data = x.to_owned();
        for (_, stage) in &mut self.stages {
            stage.fit(&data)?;
            data = stage.transform(&data)?;
        }
        self.model.fit(&data, y)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let data = self.transform_features(x)?;
        self.model.predict(&data)
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let data = self.transform_features(x)?;
        self.model.predict_proba(&data)
    }

    pub fn model(&self) -> &dyn Estimator {
        self.model.as_ref()
    }

    pub fn model_artifact(&self) -> Result<ModelArtifact> {
        self.model.artifact()
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(name, _)| name.as_str())
    }
}
