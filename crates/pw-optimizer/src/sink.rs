//! File-backed persistence of trial candidates.

use async_trait::async_trait;
use pw_types::{CandidateArtifact, PwResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::collaborators::PersistenceSink;
use crate::proposer::VariantPool;

/// File name of the final best candidate.
pub const BEST_FILE: &str = "best_prompt.json";

/// Writes each candidate as pretty JSON under a run directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    pub root: PathBuf,
}

impl DirectorySink {
    pub fn new<P: AsRef<Path>>(root: P) -> PwResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        Ok(Self { root })
    }

    /// `trial_<n>.json`, or `trial_<n>_<note>.json` when a note is given.
    fn trial_path(&self, trial: usize, note: Option<&str>) -> PathBuf {
        match note {
            Some(note) => self.root.join(format!("trial_{trial}_{note}.json")),
            None => self.root.join(format!("trial_{trial}.json")),
        }
    }

    /// `<label>_pool.json`
    fn pool_path(&self, label: &str) -> PathBuf {
        self.root.join(format!("{label}_pool.json"))
    }

    async fn write<T: Serialize + Sync>(&self, path: PathBuf, value: &T) -> PwResult<String> {
        let json = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, json).await?;
        debug!("Persisted {}", path.display());
        Ok(path.display().to_string())
    }
}

#[async_trait]
impl PersistenceSink for DirectorySink {
    async fn persist(&self, candidate: &CandidateArtifact, trial: usize, note: Option<&str>) -> PwResult<String> {
        self.write(self.trial_path(trial, note), candidate).await
    }

    async fn persist_best(&self, candidate: &CandidateArtifact, _trials_run: usize) -> PwResult<String> {
        self.write(self.root.join(BEST_FILE), candidate).await
    }

    async fn persist_pool(&self, pool: &VariantPool) -> PwResult<String> {
        self.write(self.pool_path(pool.label()), pool).await
    }
}
