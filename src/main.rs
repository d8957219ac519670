//! churn-train - train a churn classifier end to end.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use churn_automl::data;
use churn_automl::models::LogisticRegressionSpec;
use churn_automl::pipeline::Transform;
use churn_automl::preprocessing::ColumnTransform;
use churn_automl::registry::ModelRegistry;
use churn_automl::tracking::{ExperimentTracker, TrackingConfig};
use churn_automl::trainer::{NestedCvTrainer, TrainedModel};

#[derive(Parser, Debug)]
#[command(name = "churn-train", about = "Train a churn prediction model")]
struct Args {
    /// Path to the training CSV
    #[arg(short = 'd', long, default_value = "data/train.csv")]
    dataset_path: PathBuf,

    /// Seed for splits and model randomness
    #[arg(long, default_value_t = 42)]
    random_state: u64,

    /// Fraction of rows held out for validation, in (0, 1)
    #[arg(long, default_value_t = 0.2)]
    test_split_ratio: f64,

    /// Directory the tracking backend and registry write under
    #[arg(long, default_value = "churn-runs")]
    tracking_dir: PathBuf,

    /// Experiment the run is recorded in
    #[arg(long, default_value = "customer-churn")]
    experiment: String,

    /// Skip experiment tracking entirely
    #[arg(long)]
    disable_tracking: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let dataset = data::load_churn_csv(&args.dataset_path)
        .with_context(|| format!("loading {}", args.dataset_path.display()))?;
    println!(
        "Dataset shape: ({}, {}).",
        dataset.features.nrows(),
        dataset.features.ncols()
    );

    let (x_train, x_val, y_train, y_val) = data::train_test_split(
        &dataset.features,
        &dataset.target,
        args.test_split_ratio,
        args.random_state,
    )?;

    let registry = if args.disable_tracking {
        ModelRegistry::in_memory()
    } else {
        ModelRegistry::with_storage(&args.tracking_dir)?
    };
    let tracker = if args.disable_tracking {
        ExperimentTracker::disabled(registry)
    } else {
        let config = TrackingConfig {
            endpoint: args.tracking_dir.clone(),
            experiment_name: args.experiment.clone(),
            enabled: true,
        };
        ExperimentTracker::new(config, registry)?
    };

    let preprocessor = ColumnTransform::new(
        dataset.numeric_indices.clone(),
        dataset.categorical_indices.clone(),
    );
    let stages = vec![(
        "num_cat_preprocessor".to_string(),
        Box::new(preprocessor) as Box<dyn Transform>,
    )];

    let spec = LogisticRegressionSpec::new(args.random_state);
    let mut trainer =
        NestedCvTrainer::new(Box::new(spec), tracker, args.random_state).with_feature_stages(stages);

    let summary = trainer.train_with_logging(&x_train, &y_train, None)?;
    println!(
        "Nested CV ROC AUC: {:.4} (+/- {:.4}).",
        summary.mean, summary.std
    );

    let roc_auc = trainer.evaluate(&x_val, &y_val)?;
    println!("ROC AUC score: {roc_auc}.");
    Ok(())
}
