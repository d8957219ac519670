//! Experiment tracker: experiments, runs and RAII run guards.
//!
//! A training entry point opens a run with [`ExperimentTracker::start_run`]
//! and receives a [`RunGuard`]. The guard closes the run on every exit path:
//! calling [`RunGuard::finish`] records it as `Finished`, dropping it any
//! other way records it as `Failed`. The run id is cached on the tracker, so
//! a later `start_run` from the same tracker reopens the same logical run and
//! appends to it instead of creating a sibling.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ChurnError, Result};
use crate::models::ModelArtifact;
use crate::registry::ModelRegistry;
use crate::tracking::storage::{LocalStorage, StorageBackend};

/// Tag holding the source revision the run was produced from.
pub const GIT_COMMIT_TAG: &str = "source.git.commit";

/// Process-wide tracking configuration, fixed before the first run opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Directory the local backend writes under.
    pub endpoint: PathBuf,
    pub experiment_name: String,
    pub enabled: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            endpoint: PathBuf::from("churn-runs"),
            experiment_name: "customer-churn".to_string(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub run_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub params: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
    pub tags: HashMap<String, String>,
    pub artifacts: Vec<String>,
}

impl Run {
    fn new(run_name: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            run_name: run_name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: RunStatus::Running,
            params: HashMap::new(),
            metrics: HashMap::new(),
            tags: HashMap::new(),
            artifacts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub runs: Vec<Run>,
}

impl Experiment {
    pub fn new(name: &str) -> Self {
        Self {
            experiment_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
            runs: Vec::new(),
        }
    }
}

struct TrackerState {
    config: TrackingConfig,
    autolog: bool,
    storage: Option<LocalStorage>,
    experiments: Vec<Experiment>,
    experiment_id: Option<String>,
    run_id: Option<String>,
    run_active: bool,
}

impl TrackerState {
    fn persist(&self) -> Result<()> {
        if let Some(storage) = &self.storage {
            storage.save(&self.experiments)?;
        }
        Ok(())
    }

    fn active_run_mut(&mut self) -> Result<&mut Run> {
        if !self.run_active {
            return Err(ChurnError::TrackingError("no active run".to_string()));
        }
        let exp_id = self.experiment_id.clone();
        let run_id = self.run_id.clone();
        self.experiments
            .iter_mut()
            .find(|e| Some(&e.experiment_id) == exp_id.as_ref())
            .and_then(|e| e.runs.iter_mut().find(|r| Some(&r.run_id) == run_id.as_ref()))
            .ok_or_else(|| ChurnError::TrackingError("active run not found".to_string()))
    }
}

/// Cloneable handle to shared tracking state. The registry rides along so
/// model artifacts logged from a run land in it.
#[derive(Clone)]
pub struct ExperimentTracker {
    state: Arc<Mutex<TrackerState>>,
    registry: ModelRegistry,
}

impl ExperimentTracker {
    /// Open the tracker. With tracking enabled an unusable endpoint is a
    /// hard error; disabled tracking never touches the filesystem.
    pub fn new(config: TrackingConfig, registry: ModelRegistry) -> Result<Self> {
        let (storage, experiments) = if config.enabled {
            let storage = LocalStorage::new(&config.endpoint).map_err(|e| {
                ChurnError::TrackingError(format!(
                    "tracking endpoint {} is unusable: {e}",
                    config.endpoint.display()
                ))
            })?;
            let experiments = storage.load().map_err(|e| {
                ChurnError::TrackingError(format!("cannot read experiment store: {e}"))
            })?;
            (Some(storage), experiments)
        } else {
            (None, Vec::new())
        };
        Ok(Self {
            state: Arc::new(Mutex::new(TrackerState {
                config,
                autolog: false,
                storage,
                experiments,
                experiment_id: None,
                run_id: None,
                run_active: false,
            })),
            registry,
        })
    }

    /// Tracker that records nothing; every logging call is a no-op.
    pub fn disabled(registry: ModelRegistry) -> Self {
        let config = TrackingConfig {
            enabled: false,
            ..TrackingConfig::default()
        };
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                config,
                autolog: false,
                storage: None,
                experiments: Vec::new(),
                experiment_id: None,
                run_id: None,
                run_active: false,
            })),
            registry,
        }
    }

    pub fn registry(&self) -> ModelRegistry {
        self.registry.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().config.enabled
    }

    pub fn enable_autolog(&self) {
        let mut state = self.state.lock();
        if !state.autolog {
            debug!("autologging enabled");
            state.autolog = true;
        }
    }

    /// Open (or reopen) the tracker's logical run.
    ///
    /// The first call creates the experiment and run and tags the run with
    /// the current source revision; later calls reopen the cached run so all
    /// phases of one training land in one place.
    pub fn start_run(&self, run_name: &str) -> Result<RunGuard> {
        let mut state = self.state.lock();
        if !state.config.enabled {
            return Ok(RunGuard {
                tracker: self.clone(),
                active: false,
                closed: false,
            });
        }
        if state.run_active {
            return Err(ChurnError::TrackingError(
                "a run is already active on this tracker".to_string(),
            ));
        }

        if state.experiment_id.is_none() {
            let name = state.config.experiment_name.clone();
            let id = match state.experiments.iter().find(|e| e.name == name) {
                Some(existing) => existing.experiment_id.clone(),
                None => {
                    let exp = Experiment::new(&name);
                    let id = exp.experiment_id.clone();
                    state.experiments.push(exp);
                    id
                }
            };
            state.experiment_id = Some(id);
        }

        let autolog = state.autolog;
        let exp_id = state
            .experiment_id
            .clone()
            .ok_or_else(|| ChurnError::TrackingError("experiment vanished".to_string()))?;
        let cached_run = state.run_id.clone().filter(|id| {
            state
                .experiments
                .iter()
                .filter(|e| e.experiment_id == exp_id)
                .any(|e| e.runs.iter().any(|r| &r.run_id == id))
        });
        let experiment = state
            .experiments
            .iter_mut()
            .find(|e| e.experiment_id == exp_id)
            .ok_or_else(|| ChurnError::TrackingError("experiment vanished".to_string()))?;

        if let Some(run) = cached_run
            .as_ref()
            .and_then(|id| experiment.runs.iter_mut().find(|r| &r.run_id == id))
        {
            run.status = RunStatus::Running;
            run.end_time = None;
            debug!(run_id = %run.run_id, "reopened run");
        } else {
            let mut run = Run::new(run_name);
            let revision = git_revision().unwrap_or_else(|| {
                warn!("not inside a git checkout, tagging run revision as unknown");
                "unknown".to_string()
            });
            run.tags.insert(GIT_COMMIT_TAG.to_string(), revision);
            run.tags.insert("autolog".to_string(), autolog.to_string());
            debug!(run_id = %run.run_id, run_name, "started run");
            let run_id = run.run_id.clone();
            experiment.runs.push(run);
            state.run_id = Some(run_id);
        }

        state.run_active = true;
        state.persist()?;
        Ok(RunGuard {
            tracker: self.clone(),
            active: true,
            closed: false,
        })
    }

    pub fn log_param(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.config.enabled {
            return Ok(());
        }
        state
            .active_run_mut()?
            .params
            .insert(name.to_string(), value.to_string());
        state.persist()
    }

    pub fn log_metric(&self, name: &str, value: f64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.config.enabled {
            return Ok(());
        }
        state
            .active_run_mut()?
            .metrics
            .insert(name.to_string(), value);
        state.persist()
    }

    /// Register a fitted model and record it as a run artifact.
    ///
    /// The registry write happens regardless of tracking being enabled; the
    /// artifact reference is only attached to the run when one is active.
    pub fn log_model(&self, name: &str, artifact: &ModelArtifact) -> Result<u32> {
        let version = self.registry.register(name, artifact.clone())?;
        let mut state = self.state.lock();
        if state.config.enabled {
            state
                .active_run_mut()?
                .artifacts
                .push(format!("{name}/v{version}"));
            state.persist()?;
        }
        Ok(version)
    }

    fn end_run(&self, status: RunStatus) -> Result<()> {
        let mut state = self.state.lock();
        if !state.config.enabled || !state.run_active {
            return Ok(());
        }
        {
            let run = state.active_run_mut()?;
            run.status = status;
            run.end_time = Some(Utc::now());
            debug!(run_id = %run.run_id, ?status, "closed run");
        }
        state.run_active = false;
        state.persist()
    }

    /// Snapshot of the tracked experiments.
    pub fn experiments(&self) -> Vec<Experiment> {
        self.state.lock().experiments.clone()
    }

    /// The tracker's cached logical run, if any.
    pub fn current_run(&self) -> Option<Run> {
        let state = self.state.lock();
        let run_id = state.run_id.as_ref()?;
        state
            .experiments
            .iter()
            .flat_map(|e| e.runs.iter())
            .find(|r| &r.run_id == run_id)
            .cloned()
    }
}

/// RAII handle for an open run.
pub struct RunGuard {
    tracker: ExperimentTracker,
    active: bool,
    closed: bool,
}

impl RunGuard {
    /// Close the run as `Finished`.
    pub fn finish(mut self) -> Result<()> {
        self.closed = true;
        if self.active {
            self.tracker.end_run(RunStatus::Finished)
        } else {
            Ok(())
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.active && !self.closed {
            if let Err(e) = self.tracker.end_run(RunStatus::Failed) {
                warn!("failed to close run: {e}");
            }
        }
    }
}

fn git_revision() -> Option<String> {
    let repo = git2::Repository::discover(".").ok()?;
    let head = repo.head().ok()?;
    let commit = head.peel_to_commit().ok()?;
    Some(commit.id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(dir: &std::path::Path) -> ExperimentTracker {
        let config = TrackingConfig {
            endpoint: dir.to_path_buf(),
            experiment_name: "test".to_string(),
            enabled: true,
        };
        ExperimentTracker::new(config, ModelRegistry::in_memory()).unwrap()
    }

    #[test]
    fn test_finish_records_finished() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        let guard = tracker.start_run("training").unwrap();
        tracker.log_metric("roc_auc", 0.9).unwrap();
        guard.finish().unwrap();

        let run = tracker.current_run().unwrap();
        assert_eq!(run.status, RunStatus::Finished);
        assert!(run.end_time.is_some());
        assert_eq!(run.metrics["roc_auc"], 0.9);
        assert!(run.tags.contains_key(GIT_COMMIT_TAG));
    }

    #[test]
    fn test_dropped_guard_records_failed() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        {
            let _guard = tracker.start_run("training").unwrap();
            // simulated error path: the guard is dropped without finish()
        }
        assert_eq!(tracker.current_run().unwrap().status, RunStatus::Failed);
    }

    #[test]
    fn test_second_start_reopens_same_run() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        let guard = tracker.start_run("training").unwrap();
        let first_id = tracker.current_run().unwrap().run_id;
        tracker.log_metric("nested_cv_roc_auc", 0.8).unwrap();
        guard.finish().unwrap();

        let guard = tracker.start_run("training").unwrap();
        tracker.log_metric("roc_auc", 0.82).unwrap();
        guard.finish().unwrap();

        let experiments = tracker.experiments();
        assert_eq!(experiments.len(), 1);
        assert_eq!(experiments[0].runs.len(), 1);
        let run = &experiments[0].runs[0];
        assert_eq!(run.run_id, first_id);
        assert_eq!(run.metrics.len(), 2);
    }

    #[test]
    fn test_disabled_tracker_is_noop() {
        let tracker = ExperimentTracker::disabled(ModelRegistry::in_memory());
        let guard = tracker.start_run("training").unwrap();
        tracker.log_metric("roc_auc", 0.5).unwrap();
        tracker.log_param("c", "1.0").unwrap();
        guard.finish().unwrap();
        assert!(tracker.experiments().is_empty());
        assert!(tracker.current_run().is_none());
    }

    #[test]
    fn test_unusable_endpoint_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let config = TrackingConfig {
            endpoint: blocker.join("sub"),
            experiment_name: "test".to_string(),
            enabled: true,
        };
        assert!(ExperimentTracker::new(config, ModelRegistry::in_memory()).is_err());
    }

    #[test]
    fn test_log_metric_without_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        assert!(tracker.log_metric("roc_auc", 0.5).is_err());
    }
}
