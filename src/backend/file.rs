//! State backend storing the document as a JSON file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::StateBackend;
use crate::State;

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn load(&self) -> Result<State> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file yet, starting empty");
                return Ok(State::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read state from {}", self.path.display()))
            }
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed state in {}", self.path.display()))
    }

    async fn save(&self, state: &State) -> Result<()> {
        let raw = serde_json::to_string_pretty(state).context("failed to serialize state")?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        tokio::fs::write(&self.path, raw)
            .await
            .with_context(|| format!("failed to write state to {}", self.path.display()))?;
        debug!(path = %self.path.display(), "saved state");
        Ok(())
    }
}
