//! In-memory secret store.
//!
//! Holds secrets in a map for the lifetime of the process. Useful for
//! tests and for dry runs where credentials should be minted but not
//! persisted anywhere durable.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::sync::Mutex;

use super::SecretStore;
use crate::{Credential, StoreType};

#[derive(Debug, Default)]
pub struct InprocessStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl InprocessStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for InprocessStore {
    fn store_type(&self) -> StoreType {
        StoreType::Inprocess
    }

    async fn write(
        &self,
        namespace: &str,
        credential: &Credential,
        _config: Option<&serde_json::Value>,
    ) -> Result<String> {
        let path = format!("{namespace}.{}", credential.name);
        self.secrets
            .lock()
            .await
            .insert(path.clone(), credential.value.expose_secret().clone());
        Ok(path)
    }

    async fn read(&self, path: &str, _config: Option<&serde_json::Value>) -> Result<Option<String>> {
        Ok(self.secrets.lock().await.get(path).cloned())
    }

    async fn delete(&self, path: &str, _config: Option<&serde_json::Value>) -> Result<()> {
        self.secrets.lock().await.remove(path);
        Ok(())
    }
}
