//! Model specifications: each spec names a model family, builds fresh
//! seed-derived estimators and declares the hyperparameter grid for its
//! pipeline's model stage.

use crate::error::Result;
use crate::models::stacking::{MetaLearnerSearch, StackedClassifier};
use crate::models::{
    Estimator, GradientBoostedClassifier, KnnClassifier, LeafwiseBoostedClassifier,
    LogisticRegression, MlpClassifier, RandomForestClassifier,
};
use crate::params::{linspace, ParamGrid, ParamValue};
use crate::pipeline::MODEL_STAGE;
use crate::registry::ModelRegistry;

/// The trainable-model contract. Implementations are interchangeable: a
/// trainer only ever sees `name`, `estimator` and `param_grid`.
///
/// `estimator` must return a fresh unfitted model whose randomness derives
/// from the spec's seed, so two calls produce estimators that train
/// identically.
pub trait ModelSpec: Send + Sync {
    fn name(&self) -> &'static str;

    fn estimator(&self) -> Result<Box<dyn Estimator>>;

    /// Grid keys are namespaced to the model stage (`model__<param>`).
    fn param_grid(&self) -> ParamGrid;
}

#[derive(Debug, Clone, Copy)]
pub struct LogisticRegressionSpec {
    pub random_state: u64,
}

impl LogisticRegressionSpec {
    pub fn new(random_state: u64) -> Self {
        Self { random_state }
    }
}

impl ModelSpec for LogisticRegressionSpec {
    fn name(&self) -> &'static str {
        "logistic_regression"
    }

    fn estimator(&self) -> Result<Box<dyn Estimator>> {
        Ok(Box::new(LogisticRegression::new()))
    }

    fn param_grid(&self) -> ParamGrid {
        ParamGrid::new()
            .add("penalty", vec![ParamValue::str("l1"), ParamValue::str("l2")])
            .add("c", linspace(0.1, 2.0, 3))
            .add(
                "fit_intercept",
                vec![ParamValue::Bool(true), ParamValue::Bool(false)],
            )
            .add("max_iter", vec![ParamValue::Int(500), ParamValue::Int(1000)])
            .prefixed(MODEL_STAGE)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RandomForestSpec {
    pub random_state: u64,
}

impl RandomForestSpec {
    pub fn new(random_state: u64) -> Self {
        Self { random_state }
    }
}

impl ModelSpec for RandomForestSpec {
    fn name(&self) -> &'static str {
        "random_forest"
    }

    fn estimator(&self) -> Result<Box<dyn Estimator>> {
        Ok(Box::new(RandomForestClassifier::new(50, self.random_state)))
    }

    fn param_grid(&self) -> ParamGrid {
        ParamGrid::new()
            .add("n_estimators", vec![ParamValue::Int(50)])
            .add(
                "min_samples_split",
                vec![ParamValue::Int(2), ParamValue::Int(22), ParamValue::Int(42)],
            )
            .add(
                "min_samples_leaf",
                vec![ParamValue::Int(1), ParamValue::Int(21)],
            )
            .prefixed(MODEL_STAGE)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KnnSpec {
    pub random_state: u64,
}

impl KnnSpec {
    pub fn new(random_state: u64) -> Self {
        Self { random_state }
    }
}

impl ModelSpec for KnnSpec {
    fn name(&self) -> &'static str {
        "knn"
    }

    fn estimator(&self) -> Result<Box<dyn Estimator>> {
        Ok(Box::new(KnnClassifier::default()))
    }

    fn param_grid(&self) -> ParamGrid {
        ParamGrid::new()
            .add(
                "n_neighbors",
                [1, 11, 21, 31, 41].iter().map(|&n| ParamValue::Int(n)).collect(),
            )
            .add(
                "metric",
                vec![
                    ParamValue::str("euclidean"),
                    ParamValue::str("manhattan"),
                    ParamValue::str("cosine"),
                ],
            )
            .prefixed(MODEL_STAGE)
    }
}

/// Classic depth-wise boosted trees, with optional categorical columns that
/// are target-mean encoded inside the model.
#[derive(Debug, Clone)]
pub struct GradientBoostedSpec {
    pub random_state: u64,
    pub cat_features: Vec<usize>,
}

impl GradientBoostedSpec {
    pub fn new(random_state: u64) -> Self {
        Self {
            random_state,
            cat_features: Vec::new(),
        }
    }

    pub fn with_cat_features(mut self, cat_features: Vec<usize>) -> Self {
        self.cat_features = cat_features;
        self
    }
}

impl ModelSpec for GradientBoostedSpec {
    fn name(&self) -> &'static str {
        "gradient_boosted"
    }

    fn estimator(&self) -> Result<Box<dyn Estimator>> {
        Ok(Box::new(
            GradientBoostedClassifier::new(100, 0.1, self.random_state)
                .with_cat_features(self.cat_features.clone()),
        ))
    }

    fn param_grid(&self) -> ParamGrid {
        ParamGrid::new()
            .add(
                "n_estimators",
                vec![ParamValue::Int(100), ParamValue::Int(200)],
            )
            .add(
                "learning_rate",
                vec![ParamValue::Float(0.05), ParamValue::Float(0.1)],
            )
            .add("max_depth", vec![ParamValue::Int(3), ParamValue::Int(5)])
            .prefixed(MODEL_STAGE)
    }
}

/// Boosted trees grown leaf-wise (best-first) instead of depth-wise.
#[derive(Debug, Clone, Copy)]
pub struct LeafwiseBoostedSpec {
    pub random_state: u64,
}

impl LeafwiseBoostedSpec {
    pub fn new(random_state: u64) -> Self {
        Self { random_state }
    }
}

impl ModelSpec for LeafwiseBoostedSpec {
    fn name(&self) -> &'static str {
        "leafwise_boosted"
    }

    fn estimator(&self) -> Result<Box<dyn Estimator>> {
        Ok(Box::new(LeafwiseBoostedClassifier::new(
            100,
            31,
            self.random_state,
        )))
    }

    fn param_grid(&self) -> ParamGrid {
        ParamGrid::new()
            .add(
                "num_leaves",
                [5, 7, 9, 10].iter().map(|&n| ParamValue::Int(n)).collect(),
            )
            .add("max_depth", vec![ParamValue::Int(4)])
            .add(
                "min_child_samples",
                vec![ParamValue::Int(10), ParamValue::Int(25)],
            )
            .add(
                "reg_lambda",
                vec![ParamValue::Float(0.0), ParamValue::Float(1.0)],
            )
            .prefixed(MODEL_STAGE)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeepTabularSpec {
    pub random_state: u64,
}

impl DeepTabularSpec {
    pub fn new(random_state: u64) -> Self {
        Self { random_state }
    }
}

impl ModelSpec for DeepTabularSpec {
    fn name(&self) -> &'static str {
        "deep_tabular"
    }

    fn estimator(&self) -> Result<Box<dyn Estimator>> {
        Ok(Box::new(MlpClassifier::new(vec![32], self.random_state)))
    }

    fn param_grid(&self) -> ParamGrid {
        ParamGrid::new()
            .add(
                "hidden_size",
                vec![ParamValue::Int(16), ParamValue::Int(32)],
            )
            .add(
                "learning_rate",
                vec![ParamValue::Float(0.001), ParamValue::Float(0.01)],
            )
            .add("max_epochs", vec![ParamValue::Int(100)])
            .prefixed(MODEL_STAGE)
    }
}

/// Default base models a stacking ensemble pulls from the registry.
pub const DEFAULT_BASE_MODELS: [&str; 4] = [
    "logistic_regression",
    "knn",
    "random_forest",
    "gradient_boosted",
];

/// Stacking ensemble spec: pre-fitted base models resolved from the registry
/// at construction plus a self-tuning boosted meta learner.
pub struct StackingSpec {
    pub random_state: u64,
    bases: Vec<(String, Box<dyn Estimator>)>,
}

impl StackingSpec {
    /// Resolve every base name to its staged registry version.
    ///
    /// Any name without a staged version fails here, before any training
    /// work starts.
    pub fn new(registry: &ModelRegistry, base_names: &[&str], random_state: u64) -> Result<Self> {
        let mut bases = Vec::with_capacity(base_names.len());
        for name in base_names {
            let estimator = registry.load_staged(name)?;
            bases.push((name.to_string(), estimator));
        }
        Ok(Self {
            random_state,
            bases,
        })
    }

    pub fn base_names(&self) -> Vec<&str> {
        self.bases.iter().map(|(name, _)| name.as_str()).collect()
    }

    fn meta_grid(&self) -> ParamGrid {
        ParamGrid::new()
            .add("n_estimators", vec![ParamValue::Int(50)])
            .add("max_depth", vec![ParamValue::Int(3), ParamValue::Int(4)])
            .add(
                "learning_rate",
                vec![ParamValue::Float(0.05), ParamValue::Float(0.1)],
            )
            .add(
                "subsample",
                vec![ParamValue::Float(0.66), ParamValue::Float(1.0)],
            )
    }
}

impl ModelSpec for StackingSpec {
    fn name(&self) -> &'static str {
        "stacking"
    }

    fn estimator(&self) -> Result<Box<dyn Estimator>> {
        let meta_template = Box::new(GradientBoostedClassifier::new(50, 0.1, self.random_state))
            as Box<dyn Estimator>;
        let meta = MetaLearnerSearch::new(meta_template, self.meta_grid(), 5, self.random_state);
        let stacked = StackedClassifier::new(self.bases.clone(), Box::new(meta))?;
        Ok(Box::new(stacked))
    }

    /// The ensemble exposes no outer grid: its tuning happens inside the
    /// meta learner during every fit.
    fn param_grid(&self) -> ParamGrid {
        ParamGrid::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    fn grids() -> Vec<(&'static str, ParamGrid)> {
        vec![
            ("logistic_regression", LogisticRegressionSpec::new(0).param_grid()),
            ("random_forest", RandomForestSpec::new(0).param_grid()),
            ("knn", KnnSpec::new(0).param_grid()),
            ("gradient_boosted", GradientBoostedSpec::new(0).param_grid()),
            ("leafwise_boosted", LeafwiseBoostedSpec::new(0).param_grid()),
            ("deep_tabular", DeepTabularSpec::new(0).param_grid()),
        ]
    }

    #[test]
    fn test_grids_are_namespaced_and_nonempty() {
        for (name, grid) in grids() {
            assert!(!grid.is_empty(), "{name} grid should have axes");
            for key in grid.keys() {
                let (stage, _) = params::split_key(key).unwrap();
                assert_eq!(stage, MODEL_STAGE, "{name} key {key}");
            }
        }
    }

    #[test]
    fn test_every_grid_key_is_settable() {
        for (name, grid) in grids() {
            let spec: Box<dyn ModelSpec> = match name {
                "logistic_regression" => Box::new(LogisticRegressionSpec::new(0)),
                "random_forest" => Box::new(RandomForestSpec::new(0)),
                "knn" => Box::new(KnnSpec::new(0)),
                "gradient_boosted" => Box::new(GradientBoostedSpec::new(0)),
                "leafwise_boosted" => Box::new(LeafwiseBoostedSpec::new(0)),
                _ => Box::new(DeepTabularSpec::new(0)),
            };
            for candidate in grid.candidates() {
                let mut est = spec.estimator().unwrap();
                for (key, value) in &candidate {
                    let (_, param) = params::split_key(key).unwrap();
                    est.set_param(param, value).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_estimators_are_reproducible() {
        use ndarray::{Array1, Array2};
        let rows: Vec<f64> = (0..80)
            .flat_map(|i| {
                let v = i as f64 / 80.0;
                vec![v, (i % 5) as f64, (1.0 - v) * 2.0]
            })
            .collect();
        let x = Array2::from_shape_vec((80, 3), rows).unwrap();
        let y = Array1::from_iter((0..80).map(|i| if i % 3 == 0 { 1.0 } else { 0.0 }));

        let spec = RandomForestSpec::new(9);
        let mut a = spec.estimator().unwrap();
        let mut b = spec.estimator().unwrap();
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }
}
