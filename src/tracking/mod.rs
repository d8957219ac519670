//! Experiment tracking: run records, RAII run guards and local persistence.

pub mod storage;
pub mod tracker;

pub use storage::{LocalStorage, StorageBackend};
pub use tracker::{
    Experiment, ExperimentTracker, Run, RunGuard, RunStatus, TrackingConfig, GIT_COMMIT_TAG,
};
