//! AWS Secrets Manager store.
//!
//! Secret names are rendered from the `secret_template` in the store
//! config; the default puts everything under `/<namespace>/<name>`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info};

use super::SecretStore;
use crate::{template, Credential, StoreType};

const DEFAULT_SECRET_TEMPLATE: &str = "/{{ .Namespace }}/{{ .Name }}";

#[derive(Debug, Clone, Default, Deserialize)]
struct SecretsManagerConfig {
    #[serde(default)]
    secret_template: Option<String>,
}

impl SecretsManagerConfig {
    fn parse(config: Option<&serde_json::Value>) -> Result<Self> {
        match config {
            Some(value) => {
                serde_json::from_value(value.clone()).context("invalid secretsmanager store config")
            }
            None => Ok(Self::default()),
        }
    }

    fn template(&self) -> &str {
        self.secret_template.as_deref().unwrap_or(DEFAULT_SECRET_TEMPLATE)
    }
}

pub struct SecretsManagerStore {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerStore {
    pub fn new(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(aws_sdk_secretsmanager::Client::new(&config))
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    fn store_type(&self) -> StoreType {
        StoreType::SecretsManager
    }

    async fn write(
        &self,
        namespace: &str,
        credential: &Credential,
        config: Option<&serde_json::Value>,
    ) -> Result<String> {
        let config = SecretsManagerConfig::parse(config)?;
        let path = template::render(config.template(), namespace, &credential.name)?;

        let exists = self
            .client
            .describe_secret()
            .secret_id(&path)
            .send()
            .await
            .is_ok();

        if exists {
            debug!(path = %path, "updating existing secret");
            self.client
                .put_secret_value()
                .secret_id(&path)
                .secret_string(credential.value.expose_secret())
                .send()
                .await
                .with_context(|| format!("failed to update secret {path:?}"))?;
        } else {
            info!(path = %path, "creating secret");
            self.client
                .create_secret()
                .name(&path)
                .secret_string(credential.value.expose_secret())
                .send()
                .await
                .with_context(|| format!("failed to create secret {path:?}"))?;
        }
        Ok(path)
    }

    async fn read(&self, path: &str, _config: Option<&serde_json::Value>) -> Result<Option<String>> {
        match self
            .client
            .get_secret_value()
            .secret_id(path)
            .send()
            .await
        {
            Ok(response) => Ok(response.secret_string().map(str::to_string)),
            Err(e) => {
                let e = e.into_service_error();
                if e.is_resource_not_found_exception() {
                    Ok(None)
                } else {
                    Err(e).with_context(|| format!("failed to read secret {path:?}"))
                }
            }
        }
    }

    async fn delete(&self, path: &str, _config: Option<&serde_json::Value>) -> Result<()> {
        match self
            .client
            .delete_secret()
            .secret_id(path)
            .force_delete_without_recovery(true)
            .send()
            .await
        {
            Ok(_) => {
                info!(path = %path, "deleted secret");
                Ok(())
            }
            Err(e) => {
                let e = e.into_service_error();
                if e.is_resource_not_found_exception() {
                    Ok(())
                } else {
                    Err(e).with_context(|| format!("failed to delete secret {path:?}"))
                }
            }
        }
    }
}
