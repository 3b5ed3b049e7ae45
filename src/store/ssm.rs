//! AWS Systems Manager Parameter Store store.
//!
//! Values are written as SecureString parameters. Parameter names are
//! rendered from the `key_template` in the store config; the default puts
//! everything under `/<namespace>/<name>`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_ssm::types::ParameterType;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::info;

use super::SecretStore;
use crate::{template, Credential, StoreType};

const DEFAULT_KEY_TEMPLATE: &str = "/{{ .Namespace }}/{{ .Name }}";

#[derive(Debug, Clone, Default, Deserialize)]
struct SsmConfig {
    #[serde(default)]
    key_template: Option<String>,
}

impl SsmConfig {
    fn parse(config: Option<&serde_json::Value>) -> Result<Self> {
        match config {
            Some(value) => serde_json::from_value(value.clone()).context("invalid ssm store config"),
            None => Ok(Self::default()),
        }
    }

    fn template(&self) -> &str {
        self.key_template.as_deref().unwrap_or(DEFAULT_KEY_TEMPLATE)
    }
}

pub struct SsmStore {
    client: aws_sdk_ssm::Client,
}

impl SsmStore {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(aws_sdk_ssm::Client::new(&config))
    }
}

#[async_trait]
impl SecretStore for SsmStore {
    fn store_type(&self) -> StoreType {
        StoreType::Ssm
    }

    async fn write(
        &self,
        namespace: &str,
        credential: &Credential,
        config: Option<&serde_json::Value>,
    ) -> Result<String> {
        let config = SsmConfig::parse(config)?;
        let path = template::render(config.template(), namespace, &credential.name)?;

        info!(path = %path, "writing parameter");
        self.client
            .put_parameter()
            .name(&path)
            .value(credential.value.expose_secret())
            .r#type(ParameterType::SecureString)
            .overwrite(true)
            .send()
            .await
            .with_context(|| format!("failed to write parameter {path:?}"))?;
        Ok(path)
    }

    async fn read(&self, path: &str, _config: Option<&serde_json::Value>) -> Result<Option<String>> {
        match self
            .client
            .get_parameter()
            .name(path)
            .with_decryption(true)
            .send()
            .await
        {
            Ok(response) => Ok(response
                .parameter()
                .and_then(|p| p.value())
                .map(str::to_string)),
            Err(e) => {
                let e = e.into_service_error();
                if e.is_parameter_not_found() {
                    Ok(None)
                } else {
                    Err(e).with_context(|| format!("failed to read parameter {path:?}"))
                }
            }
        }
    }

    async fn delete(&self, path: &str, _config: Option<&serde_json::Value>) -> Result<()> {
        match self.client.delete_parameter().name(path).send().await {
            Ok(_) => {
                info!(path = %path, "deleted parameter");
                Ok(())
            }
            Err(e) => {
                let e = e.into_service_error();
                if e.is_parameter_not_found() {
                    Ok(())
                } else {
                    Err(e).with_context(|| format!("failed to delete parameter {path:?}"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_template_defaults_and_overrides() {
        let config = SsmConfig::parse(None).unwrap();
        assert_eq!(
            template::render(config.template(), "team-x", "api-key").unwrap(),
            "/team-x/api-key"
        );

        let blob = serde_json::json!({ "key_template": "/ci/{{ .Namespace }}-{{ .Name }}" });
        let config = SsmConfig::parse(Some(&blob)).unwrap();
        assert_eq!(
            template::render(config.template(), "team-x", "api-key").unwrap(),
            "/ci/team-x-api-key"
        );
    }
}
