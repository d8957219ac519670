//! Stacking ensemble over pre-fitted base models.
//!
//! The bases arrive already fitted (loaded from the model registry) and are
//! never refit here; each contributes one probability column to the meta
//! feature matrix. The meta learner is a [`MetaLearnerSearch`], a grid search
//! that tunes itself with its own stratified folds on every fit.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::cross_validation::StratifiedKFold;
use crate::error::{ChurnError, Result};
use crate::models::{Estimator, ModelArtifact};
use crate::params::{ParamGrid, ParamValue};
use crate::pipeline::{TrainingPipeline, MODEL_STAGE};
use crate::search::GridSearchCv;

/// Serialized form of a fitted stacking ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackedArtifact {
    pub bases: Vec<(String, ModelArtifact)>,
    pub meta: ModelArtifact,
}

/// Grid-searched meta learner. `fit` runs a full cross-validated search over
/// the template and keeps the refitted winner.
#[derive(Clone)]
pub struct MetaLearnerSearch {
    template: Box<dyn Estimator>,
    grid: ParamGrid,
    cv: StratifiedKFold,
    best: Option<Box<dyn Estimator>>,
}

impl MetaLearnerSearch {
    pub fn new(template: Box<dyn Estimator>, grid: ParamGrid, n_splits: usize, seed: u64) -> Self {
        Self {
            template,
            grid,
            cv: StratifiedKFold::new(n_splits, seed),
            best: None,
        }
    }

    fn fitted(&self) -> Result<&dyn Estimator> {
        self.best
            .as_deref()
            .ok_or(ChurnError::ModelNotFitted)
    }
}

impl Estimator for MetaLearnerSearch {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let template = TrainingPipeline::from_model(self.template.clone());
        let search = GridSearchCv::new(template, self.grid.prefixed(MODEL_STAGE), self.cv.clone());
        let outcome = search.fit(x, y)?;
        self.best = Some(outcome.best_estimator.model().clone_box());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.fitted()?.predict(x)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.fitted()?.predict_proba(x)
    }

    fn set_param(&mut self, _name: &str, _value: &ParamValue) -> Result<()> {
        Err(ChurnError::ConfigError(
            "the meta learner tunes itself; it has no externally settable parameters".to_string(),
        ))
    }

    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    /// The winning meta model's artifact, so a persisted ensemble carries
    /// the concrete tuned learner rather than the search wrapper.
    fn artifact(&self) -> Result<ModelArtifact> {
        self.fitted()?.artifact()
    }
}

/// The stacking ensemble itself.
#[derive(Clone)]
pub struct StackedClassifier {
    bases: Vec<(String, Box<dyn Estimator>)>,
    meta: Box<dyn Estimator>,
}

impl StackedClassifier {
    pub fn new(bases: Vec<(String, Box<dyn Estimator>)>, meta: Box<dyn Estimator>) -> Result<Self> {
        if bases.is_empty() {
            return Err(ChurnError::ConfigError(
                "a stacking ensemble needs at least one base model".to_string(),
            ));
        }
        Ok(Self { bases, meta })
    }

    pub fn from_artifact(artifact: StackedArtifact) -> Self {
        Self {
            bases: artifact
                .bases
                .into_iter()
                .map(|(name, art)| (name, art.into_estimator()))
                .collect(),
            meta: artifact.meta.into_estimator(),
        }
    }

    pub fn base_names(&self) -> Vec<&str> {
        self.bases.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// One probability column per base model.
    fn meta_features(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let mut out = Array2::zeros((x.nrows(), self.bases.len()));
        for (col, (_, base)) in self.bases.iter().enumerate() {
            let proba = base.predict_proba(x)?;
            out.column_mut(col).assign(&proba);
        }
        Ok(out)
    }

    /// Deep copy with the meta search wrapper replaced by its concrete
    /// tuned winner. Fails when the ensemble has not been fitted.
    pub fn collapse(&self) -> Result<StackedClassifier> {
        Ok(StackedClassifier {
            bases: self.bases.clone(),
            meta: self.meta.artifact()?.into_estimator(),
        })
    }
}

impl Estimator for StackedClassifier {
    /// Fit the meta learner on base predictions. The bases are pre-fitted
    /// registry models and are deliberately left untouched.
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let features = self.meta_features(x)?;
        self.meta.fit(&features, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let features = self.meta_features(x)?;
        self.meta.predict(&features)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let features = self.meta_features(x)?;
        self.meta.predict_proba(&features)
    }

    fn set_param(&mut self, name: &str, _value: &ParamValue) -> Result<()> {
        Err(ChurnError::ConfigError(format!(
            "stacking ensemble has no tunable parameter '{name}'"
        )))
    }

    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }

    fn artifact(&self) -> Result<ModelArtifact> {
        let bases = self
            .bases
            .iter()
            .map(|(name, base)| Ok((name.clone(), base.artifact()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(ModelArtifact::Stacking(Box::new(StackedArtifact {
            bases,
            meta: self.meta.artifact()?,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DistanceMetric, KnnClassifier, LogisticRegression};
    use ndarray::{Array1, Array2};

    fn data() -> (Array2<f64>, Array1<f64>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let off = (i % 6) as f64 * 0.07;
            if i % 2 == 0 {
                rows.extend([1.0 + off, 1.2 - off]);
                labels.push(1.0);
            } else {
                rows.extend([-1.0 - off, -1.2 + off]);
                labels.push(0.0);
            }
        }
        (
            Array2::from_shape_vec((60, 2), rows).unwrap(),
            Array1::from(labels),
        )
    }

    fn fitted_bases(
        x: &Array2<f64>,
        y: &Array1<f64>,
    ) -> Vec<(String, Box<dyn Estimator>)> {
        let mut logreg = LogisticRegression::new();
        logreg.fit(x, y).unwrap();
        let mut knn = KnnClassifier::new(3, DistanceMetric::Euclidean);
        knn.fit(x, y).unwrap();
        vec![
            ("logreg".to_string(), Box::new(logreg) as Box<dyn Estimator>),
            ("knn".to_string(), Box::new(knn) as Box<dyn Estimator>),
        ]
    }

    fn meta() -> Box<dyn Estimator> {
        let grid = ParamGrid::new().add(
            "max_iter",
            vec![ParamValue::Int(100), ParamValue::Int(200)],
        );
        Box::new(MetaLearnerSearch::new(
            Box::new(LogisticRegression::new()),
            grid,
            5,
            0,
        ))
    }

    #[test]
    fn test_fit_tunes_meta_and_predicts() {
        let (x, y) = data();
        let mut stacked = StackedClassifier::new(fitted_bases(&x, &y), meta()).unwrap();
        stacked.fit(&x, &y).unwrap();
        let preds = stacked.predict(&x).unwrap();
        let correct = preds
            .iter()
            .zip(y.iter())
            .filter(|(p, t)| (*p - *t).abs() < 0.5)
            .count();
        assert!(correct >= 55);
    }

    #[test]
    fn test_collapse_replaces_search_with_winner() {
        let (x, y) = data();
        let mut stacked = StackedClassifier::new(fitted_bases(&x, &y), meta()).unwrap();
        // collapsing before fit is a NotFitted error
        assert!(stacked.collapse().is_err());
        stacked.fit(&x, &y).unwrap();
        let collapsed = stacked.collapse().unwrap();
        assert_eq!(
            collapsed.predict_proba(&x).unwrap(),
            stacked.predict_proba(&x).unwrap()
        );
        // the collapsed meta is a concrete model, not the search wrapper
        assert!(matches!(
            collapsed.meta.artifact().unwrap(),
            ModelArtifact::LogisticRegression(_)
        ));
    }

    #[test]
    fn test_artifact_roundtrip_preserves_predictions() {
        let (x, y) = data();
        let mut stacked = StackedClassifier::new(fitted_bases(&x, &y), meta()).unwrap();
        stacked.fit(&x, &y).unwrap();
        let artifact = stacked.artifact().unwrap();
        let json = serde_json::to_string(&artifact).unwrap();
        let restored: ModelArtifact = serde_json::from_str(&json).unwrap();
        let restored = restored.into_estimator();
        assert_eq!(
            restored.predict_proba(&x).unwrap(),
            stacked.predict_proba(&x).unwrap()
        );
    }

    #[test]
    fn test_empty_bases_rejected() {
        assert!(StackedClassifier::new(Vec::new(), meta()).is_err());
    }

    #[test]
    fn test_bases_are_not_refit() {
        let (x, y) = data();
        let bases = fitted_bases(&x, &y);
        let before = bases[0].1.predict_proba(&x).unwrap();
        let mut stacked = StackedClassifier::new(bases, meta()).unwrap();
        stacked.fit(&x, &y).unwrap();
        let after = stacked.bases[0].1.predict_proba(&x).unwrap();
        assert_eq!(before, after);
    }
}
