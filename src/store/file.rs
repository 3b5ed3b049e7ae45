//! Filesystem secret store.
//!
//! Writes each credential value to `<root>/<namespace>/<name>`. Intended
//! for development and for hosts that mount a tmpfs or encrypted volume
//! for secrets.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::SecretStore;
use crate::{Credential, StoreType};

#[derive(Debug, Clone, Default, Deserialize)]
struct FileStoreConfig {
    #[serde(default)]
    root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn root<'a>(&'a self, config: &'a FileStoreConfig) -> &'a Path {
        config.root.as_deref().unwrap_or(&self.root)
    }

    fn parse_config(config: Option<&serde_json::Value>) -> Result<FileStoreConfig> {
        match config {
            Some(value) => {
                serde_json::from_value(value.clone()).context("invalid file store config")
            }
            None => Ok(FileStoreConfig::default()),
        }
    }
}

#[async_trait]
impl SecretStore for FileStore {
    fn store_type(&self) -> StoreType {
        StoreType::File
    }

    async fn write(
        &self,
        namespace: &str,
        credential: &Credential,
        config: Option<&serde_json::Value>,
    ) -> Result<String> {
        let config = Self::parse_config(config)?;
        let path = self.root(&config).join(namespace).join(&credential.name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, credential.value.expose_secret())
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn read(&self, path: &str, _config: Option<&serde_json::Value>) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {path}")),
        }
    }

    async fn delete(&self, path: &str, _config: Option<&serde_json::Value>) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete {path}")),
        }
    }
}
