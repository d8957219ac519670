//! End-to-end training framework tests on synthetic churn-like data.

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use churn_automl::models::spec::DEFAULT_BASE_MODELS;
use churn_automl::prelude::*;
use churn_automl::registry::ModelRegistry;
use churn_automl::trainer::N_SPLITS;
use churn_automl::tracking::{ExperimentTracker, RunStatus, TrackingConfig};

/// Synthetic dataset in the churn shape: three numeric columns, two
/// categorical code columns, binary target correlated with the features.
fn synthetic_churn(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(n * 5);
    let mut labels = Vec::with_capacity(n);
    for _ in 0..n {
        let period: f64 = rng.gen_range(0.0..72.0);
        let monthly: f64 = rng.gen_range(20.0..120.0);
        let total = period * monthly + rng.gen_range(-50.0..50.0);
        let contract = rng.gen_range(0..3) as f64;
        let payment = rng.gen_range(0..4) as f64;

        let z = -0.04 * period + 0.02 * (monthly - 70.0) - 0.6 * contract
            + 0.15 * payment
            + rng.gen_range(-1.0..1.0);
        rows.extend([period, monthly, total, contract, payment]);
        labels.push(if z > -0.8 { 1.0 } else { 0.0 });
    }
    (
        Array2::from_shape_vec((n, 5), rows).expect("shape"),
        Array1::from(labels),
    )
}

fn column_stages() -> Vec<(String, Box<dyn Transform>)> {
    vec![(
        "num_cat_preprocessor".to_string(),
        Box::new(ColumnTransform::new(vec![0, 1, 2], vec![3, 4])) as Box<dyn Transform>,
    )]
}

fn tracker_in(dir: &std::path::Path) -> ExperimentTracker {
    let config = TrackingConfig {
        endpoint: dir.to_path_buf(),
        experiment_name: "it-tests".to_string(),
        enabled: true,
    };
    ExperimentTracker::new(config, ModelRegistry::in_memory()).expect("tracker")
}

#[test]
fn test_logreg_nested_cv_scenario() {
    let (x, y) = synthetic_churn(200, 0);
    let dir = tempfile::tempdir().expect("tempdir");
    let tracker = tracker_in(dir.path());

    let mut trainer = NestedCvTrainer::new(
        Box::new(LogisticRegressionSpec::new(0)),
        tracker.clone(),
        0,
    )
    .with_feature_stages(column_stages());

    let summary = trainer
        .train_with_logging(&x, &y, Some("scenario"))
        .expect("training succeeds");

    assert_eq!(summary.scores.len(), N_SPLITS);
    assert!(summary.mean.is_finite());
    assert!((0.0..=1.0).contains(&summary.mean));
    assert!((0.0..=1.0).contains(&summary.std));

    let run = tracker.current_run().expect("run recorded");
    assert_eq!(run.status, RunStatus::Finished);
    assert!((0.0..=1.0).contains(&run.metrics["nested_cv_roc_auc"]));
    assert!((0.0..=1.0).contains(&run.metrics["nested_cv_std"]));
    assert!(run.tags.contains_key("source.git.commit"));

    let best = trainer.best_estimator().expect("retained estimator");
    assert_eq!(best.predict(&x).expect("predict").len(), 200);

    // evaluation appends to the same logical run
    let score = trainer.evaluate(&x, &y).expect("evaluate");
    assert!((0.0..=1.0).contains(&score));
    let experiments = tracker.experiments();
    assert_eq!(experiments.len(), 1);
    assert_eq!(experiments[0].runs.len(), 1);
    assert!(experiments[0].runs[0].metrics.contains_key("roc_auc"));
}

#[test]
fn test_evaluate_before_training_fails_for_every_variant() {
    let (x, y) = synthetic_churn(60, 1);
    let specs: Vec<Box<dyn ModelSpec>> = vec![
        Box::new(LogisticRegressionSpec::new(0)),
        Box::new(RandomForestSpec::new(0)),
        Box::new(KnnSpec::new(0)),
        Box::new(GradientBoostedSpec::new(0)),
        Box::new(LeafwiseBoostedSpec::new(0)),
        Box::new(DeepTabularSpec::new(0)),
    ];
    for spec in specs {
        let name = spec.name();
        let tracker = ExperimentTracker::disabled(ModelRegistry::in_memory());
        let mut trainer = NestedCvTrainer::new(spec, tracker, 0);
        assert!(
            matches!(trainer.evaluate(&x, &y), Err(ChurnError::ModelNotFitted)),
            "{name} should require training before evaluation"
        );
    }

    // the stacking trainer behaves the same once its bases resolve
    let registry = staged_registry(&x, &y);
    let spec = StackingSpec::new(&registry, &["logistic_regression"], 0).expect("staged base");
    let tracker = ExperimentTracker::disabled(registry);
    let mut trainer = StackingTrainer::new(spec, tracker, 0);
    assert!(matches!(
        trainer.evaluate(&x, &y),
        Err(ChurnError::ModelNotFitted)
    ));
}

/// Registry with fitted, staged logistic regression and knn base models.
fn staged_registry(x: &Array2<f64>, y: &Array1<f64>) -> ModelRegistry {
    let registry = ModelRegistry::in_memory();
    let mut logreg = LogisticRegressionSpec::new(0).estimator().expect("spec");
    logreg.fit(x, y).expect("fit");
    let v = registry
        .register("logistic_regression", logreg.artifact().expect("artifact"))
        .expect("register");
    registry
        .transition("logistic_regression", v, Stage::Staging)
        .expect("stage");

    let mut knn = KnnSpec::new(0).estimator().expect("spec");
    knn.fit(x, y).expect("fit");
    let v = registry
        .register("knn", knn.artifact().expect("artifact"))
        .expect("register");
    registry.transition("knn", v, Stage::Staging).expect("stage");
    registry
}

#[test]
fn test_stacking_missing_staged_base_fails_before_training() {
    let (x, y) = synthetic_churn(60, 2);
    let registry = staged_registry(&x, &y);

    // unknown name
    assert!(StackingSpec::new(&registry, &DEFAULT_BASE_MODELS, 0).is_err());

    // registered but never staged
    let mut forest = RandomForestSpec::new(0).estimator().expect("spec");
    forest.fit(&x, &y).expect("fit");
    registry
        .register("random_forest", forest.artifact().expect("artifact"))
        .expect("register");
    assert!(StackingSpec::new(&registry, &["random_forest"], 0).is_err());

    // staged bases resolve
    assert!(StackingSpec::new(&registry, &["logistic_regression", "knn"], 0).is_ok());
}

#[test]
fn test_stacking_trains_and_registers_artifact() {
    let (x, y) = synthetic_churn(120, 3);
    let registry = staged_registry(&x, &y);
    let dir = tempfile::tempdir().expect("tempdir");
    let config = TrackingConfig {
        endpoint: dir.path().to_path_buf(),
        experiment_name: "stacking".to_string(),
        enabled: true,
    };
    let tracker = ExperimentTracker::new(config, registry.clone()).expect("tracker");

    let spec = StackingSpec::new(&registry, &["logistic_regression", "knn"], 0).expect("bases");
    let mut trainer = StackingTrainer::new(spec, tracker.clone(), 0);
    let summary = trainer.train_with_logging(&x, &y, None).expect("train");

    assert_eq!(summary.scores.len(), N_SPLITS);
    assert!(summary.scores.iter().all(|s| (0.0..=1.0).contains(s)));

    // the fitted ensemble landed in the registry and on the run
    let run = tracker.current_run().expect("run");
    assert_eq!(run.status, RunStatus::Finished);
    assert!(run.artifacts.iter().any(|a| a.starts_with("stacking/")));
    assert!(registry.model_names().contains(&"stacking".to_string()));

    let best = trainer.best_estimator().expect("retained ensemble");
    assert_eq!(best.predict(&x).expect("predict").len(), 120);

    let score = trainer.evaluate(&x, &y).expect("evaluate");
    assert!((0.0..=1.0).contains(&score));
}

#[test]
fn test_auc_reflects_signal_strength() {
    // strongly separable labels
    let (x, _) = synthetic_churn(150, 4);
    let y_sep = x.column(0).mapv(|v| if v > 36.0 { 1.0 } else { 0.0 });
    let tracker = ExperimentTracker::disabled(ModelRegistry::in_memory());
    let mut trainer = NestedCvTrainer::new(Box::new(KnnSpec::new(0)), tracker, 0)
        .with_feature_stages(column_stages());
    let summary = trainer.train_with_logging(&x, &y_sep, None).expect("train");
    assert!(
        summary.mean > 0.75,
        "separable data should score well, got {}",
        summary.mean
    );

    // labels independent of the features hover around chance
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let y_rand = Array1::from_iter((0..150).map(|_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 }));
    let tracker = ExperimentTracker::disabled(ModelRegistry::in_memory());
    let mut trainer = NestedCvTrainer::new(Box::new(KnnSpec::new(0)), tracker, 0)
        .with_feature_stages(column_stages());
    let summary = trainer.train_with_logging(&x, &y_rand, None).expect("train");
    assert!(
        (0.3..0.7).contains(&summary.mean),
        "independent labels should score near 0.5, got {}",
        summary.mean
    );
}

#[test]
fn test_failed_training_still_closes_run() {
    // a single-class target makes ROC AUC undefined, so training errors out
    let (x, _) = synthetic_churn(60, 5);
    let y = Array1::zeros(60);
    let dir = tempfile::tempdir().expect("tempdir");
    let tracker = tracker_in(dir.path());
    let mut trainer = NestedCvTrainer::new(Box::new(KnnSpec::new(0)), tracker.clone(), 0);

    assert!(trainer.train_with_logging(&x, &y, None).is_err());
    let run = tracker.current_run().expect("run recorded");
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.end_time.is_some());
}
