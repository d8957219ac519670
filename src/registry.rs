//! Versioned model registry with lifecycle stages.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ChurnError, Result};
use crate::models::{Estimator, ModelArtifact};

const REGISTRY_FILE: &str = "registry.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    None,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: u32,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    pub artifact: ModelArtifact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    pub versions: Vec<ModelVersion>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryState {
    models: HashMap<String, RegisteredModel>,
}

/// Shared handle to the registry. Versions are immutable once registered;
/// only their stage moves.
#[derive(Clone)]
pub struct ModelRegistry {
    state: Arc<Mutex<RegistryState>>,
    path: Option<PathBuf>,
}

impl ModelRegistry {
    /// Registry without persistence.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            path: None,
        }
    }

    /// Registry persisted as JSON under `dir`.
    pub fn with_storage(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(REGISTRY_FILE);
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            RegistryState::default()
        };
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            path: Some(path),
        })
    }

    fn persist(&self, state: &RegistryState) -> Result<()> {
        if let Some(path) = &self.path {
            std::fs::write(path, serde_json::to_string_pretty(state)?)?;
        }
        Ok(())
    }

    /// Register a new version of `name`, starting at stage `None`.
    pub fn register(&self, name: &str, artifact: ModelArtifact) -> Result<u32> {
        let mut state = self.state.lock();
        let model = state
            .models
            .entry(name.to_string())
            .or_insert_with(|| RegisteredModel {
                name: name.to_string(),
                versions: Vec::new(),
            });
        let version = model.versions.last().map_or(1, |v| v.version + 1);
        model.versions.push(ModelVersion {
            version,
            stage: Stage::None,
            created_at: Utc::now(),
            artifact,
        });
        self.persist(&state)?;
        Ok(version)
    }

    /// Move one version of `name` to `stage`.
    pub fn transition(&self, name: &str, version: u32, stage: Stage) -> Result<()> {
        let mut state = self.state.lock();
        let model = state.models.get_mut(name).ok_or_else(|| {
            ChurnError::RegistryError(format!("model '{name}' is not registered"))
        })?;
        let entry = model
            .versions
            .iter_mut()
            .find(|v| v.version == version)
            .ok_or_else(|| {
                ChurnError::RegistryError(format!("model '{name}' has no version {version}"))
            })?;
        entry.stage = stage;
        self.persist(&state)?;
        Ok(())
    }

    /// Load the latest `Staging` version of `name` as a live estimator.
    ///
    /// Fails when the name is unknown or no version is staged; there is no
    /// fail-over to other stages.
    pub fn load_staged(&self, name: &str) -> Result<Box<dyn Estimator>> {
        let state = self.state.lock();
        let model = state.models.get(name).ok_or_else(|| {
            ChurnError::RegistryError(format!("model '{name}' is not registered"))
        })?;
        let staged = model
            .versions
            .iter()
            .rev()
            .find(|v| v.stage == Stage::Staging)
            .ok_or_else(|| {
                ChurnError::RegistryError(format!("model '{name}' has no staged version"))
            })?;
        Ok(staged.artifact.clone().into_estimator())
    }

    pub fn model_names(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state.models.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Estimator, LogisticRegression};
    use ndarray::array;

    fn fitted_artifact() -> ModelArtifact {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut model = LogisticRegression::new();
        model.fit(&x, &y).unwrap();
        model.artifact().unwrap()
    }

    #[test]
    fn test_versions_increment() {
        let registry = ModelRegistry::in_memory();
        assert_eq!(registry.register("m", fitted_artifact()).unwrap(), 1);
        assert_eq!(registry.register("m", fitted_artifact()).unwrap(), 2);
    }

    #[test]
    fn test_load_staged_requires_staged_version() {
        let registry = ModelRegistry::in_memory();
        assert!(registry.load_staged("missing").is_err());
        let v = registry.register("m", fitted_artifact()).unwrap();
        // registered but not staged
        assert!(registry.load_staged("m").is_err());
        registry.transition("m", v, Stage::Staging).unwrap();
        let est = registry.load_staged("m").unwrap();
        // rehydrated model is already fitted
        assert!(est.predict(&array![[0.0], [3.0]]).is_ok());
    }

    #[test]
    fn test_latest_staged_wins() {
        let registry = ModelRegistry::in_memory();
        let v1 = registry.register("m", fitted_artifact()).unwrap();
        let v2 = registry.register("m", fitted_artifact()).unwrap();
        registry.transition("m", v1, Stage::Staging).unwrap();
        registry.transition("m", v2, Stage::Staging).unwrap();
        registry.transition("m", v1, Stage::Production).unwrap();
        assert!(registry.load_staged("m").is_ok());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = ModelRegistry::with_storage(dir.path()).unwrap();
            let v = registry.register("m", fitted_artifact()).unwrap();
            registry.transition("m", v, Stage::Staging).unwrap();
        }
        let reopened = ModelRegistry::with_storage(dir.path()).unwrap();
        assert!(reopened.load_staged("m").is_ok());
        assert_eq!(reopened.model_names(), vec!["m".to_string()]);
    }
}
