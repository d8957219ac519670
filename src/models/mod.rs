//! Model implementations and the polymorphic estimator/spec contracts.

pub mod decision_tree;
pub mod gradient_boosting;
pub mod knn;
pub mod leafwise_boosting;
pub mod logistic_regression;
pub mod mlp;
pub mod random_forest;
pub mod spec;
pub mod stacking;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::params::ParamValue;

pub use decision_tree::{Criterion, DecisionTree};
pub use gradient_boosting::GradientBoostedClassifier;
pub use knn::{DistanceMetric, KnnClassifier};
pub use leafwise_boosting::LeafwiseBoostedClassifier;
pub use logistic_regression::{LogisticRegression, Penalty};
pub use mlp::MlpClassifier;
pub use random_forest::RandomForestClassifier;
pub use spec::{
    DeepTabularSpec, GradientBoostedSpec, KnnSpec, LeafwiseBoostedSpec, LogisticRegressionSpec,
    ModelSpec, RandomForestSpec, StackingSpec,
};
pub use stacking::{MetaLearnerSearch, StackedArtifact, StackedClassifier};

/// A binary classifier that can be tuned, fitted and serialized.
///
/// `predict_proba` returns the positive-class score per row; `predict`
/// thresholds it at 0.5. `set_param` accepts un-namespaced parameter names
/// (namespacing is the pipeline's concern) and rejects names the model does
/// not have.
pub trait Estimator: Send + Sync {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()>;

    fn clone_box(&self) -> Box<dyn Estimator>;

    /// Serializable snapshot of the fitted model. Fails when unfitted.
    fn artifact(&self) -> Result<ModelArtifact>;
}

impl Clone for Box<dyn Estimator> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Serialized form of a fitted model, the unit the registry stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelArtifact {
    LogisticRegression(LogisticRegression),
    DecisionTree(DecisionTree),
    Knn(KnnClassifier),
    RandomForest(RandomForestClassifier),
    GradientBoosted(GradientBoostedClassifier),
    LeafwiseBoosted(LeafwiseBoostedClassifier),
    DeepTabular(MlpClassifier),
    Stacking(Box<StackedArtifact>),
}

impl ModelArtifact {
    pub fn kind(&self) -> &'static str {
        match self {
            ModelArtifact::LogisticRegression(_) => "logistic_regression",
            ModelArtifact::DecisionTree(_) => "decision_tree",
            ModelArtifact::Knn(_) => "knn",
            ModelArtifact::RandomForest(_) => "random_forest",
            ModelArtifact::GradientBoosted(_) => "gradient_boosted",
            ModelArtifact::LeafwiseBoosted(_) => "leafwise_boosted",
            ModelArtifact::DeepTabular(_) => "deep_tabular",
            ModelArtifact::Stacking(_) => "stacking",
        }
    }

    /// Rehydrate the artifact into a live, already-fitted estimator.
    pub fn into_estimator(self) -> Box<dyn Estimator> {
        match self {
            ModelArtifact::LogisticRegression(m) => Box::new(m),
            ModelArtifact::DecisionTree(m) => Box::new(m),
            ModelArtifact::Knn(m) => Box::new(m),
            ModelArtifact::RandomForest(m) => Box::new(m),
            ModelArtifact::GradientBoosted(m) => Box::new(m),
            ModelArtifact::LeafwiseBoosted(m) => Box::new(m),
            ModelArtifact::DeepTabular(m) => Box::new(m),
            ModelArtifact::Stacking(a) => Box::new(StackedClassifier::from_artifact(*a)),
        }
    }
}
