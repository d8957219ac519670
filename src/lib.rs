//! churn-automl - Nested cross-validated training for churn prediction
//!
//! This crate trains binary churn classifiers behind one polymorphic
//! contract:
//! - [`models`] - Estimators, model specs and the stacking ensemble
//! - [`pipeline`] - Feature transforms ahead of a single model stage
//! - [`search`] - Cross-validated exhaustive hyperparameter search
//! - [`trainer`] - Nested-CV training protocol with run logging
//! - [`tracking`] - Experiments, runs and RAII run guards
//! - [`registry`] - Versioned model registry with lifecycle stages
//! - [`data`] - Churn CSV ingestion and train/test splitting

// Core error handling
pub mod error;

// Building blocks
pub mod cross_validation;
pub mod metrics;
pub mod params;
pub mod preprocessing;

// Models and training
pub mod models;
pub mod pipeline;
pub mod search;
pub mod trainer;

// Infrastructure
pub mod data;
pub mod registry;
pub mod tracking;

pub mod prelude {
    // Error handling
    pub use crate::error::{ChurnError, Result};

    // Cross-validation and metrics
    pub use crate::cross_validation::{CvSummary, StratifiedKFold};
    pub use crate::metrics::roc_auc_score;
    pub use crate::params::{ParamGrid, ParamValue};

    // Pipeline and preprocessing
    pub use crate::pipeline::{TrainingPipeline, Transform, MODEL_STAGE};
    pub use crate::preprocessing::{ColumnTransform, OneHotEncoder, StandardScaler};

    // Models
    pub use crate::models::{
        DeepTabularSpec, Estimator, GradientBoostedSpec, KnnSpec, LeafwiseBoostedSpec,
        LogisticRegressionSpec, ModelArtifact, ModelSpec, RandomForestSpec, StackingSpec,
    };

    // Training
    pub use crate::search::{GridSearchCv, SearchOutcome};
    pub use crate::trainer::{NestedCvTrainer, StackingTrainer, TrainedModel};

    // Tracking and registry
    pub use crate::registry::{ModelRegistry, Stage};
    pub use crate::tracking::{ExperimentTracker, RunGuard, RunStatus, TrackingConfig};
}
