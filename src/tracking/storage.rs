//! Persistence backend for experiment data.

use std::path::PathBuf;

use crate::error::Result;
use crate::tracking::tracker::Experiment;

const EXPERIMENTS_FILE: &str = "experiments.json";

/// Where experiment runs are written. The only backend today is a local
/// JSON file under the tracking endpoint directory.
pub trait StorageBackend: Send + Sync {
    fn save(&self, experiments: &[Experiment]) -> Result<()>;

    fn load(&self) -> Result<Vec<Experiment>>;
}

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Fails when the endpoint directory cannot be created, which callers
    /// treat as the tracking backend being unavailable.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn file(&self) -> PathBuf {
        self.root.join(EXPERIMENTS_FILE)
    }
}

impl StorageBackend for LocalStorage {
    fn save(&self, experiments: &[Experiment]) -> Result<()> {
        let json = serde_json::to_string_pretty(experiments)?;
        std::fs::write(self.file(), json)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<Experiment>> {
        let path = self.file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
