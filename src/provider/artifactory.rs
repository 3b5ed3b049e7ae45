//! Provider for Artifactory access tokens.
//!
//! Mints scoped, expiring tokens through the Artifactory access API using
//! an admin token. The token ID is recorded as resource metadata so the
//! token can be revoked when the resource is destroyed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::Provider;
use crate::clock::{Clock, SystemClock};
use crate::state::Resource;
use crate::{Credential, Metadata, ProviderType, Request};

const DEFAULT_TOKEN_DURATION_SECS: i64 = 3600;

#[derive(Debug, Clone, Deserialize)]
struct ArtifactoryRequestConfig {
    user: String,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    duration: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenMetadata {
    token_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token_id: String,
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct ArtifactoryProvider {
    client: reqwest::Client,
    base_url: String,
    admin_token: SecretString,
    clock: Arc<dyn Clock>,
}

impl ArtifactoryProvider {
    pub fn new(base_url: impl Into<String>, admin_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            admin_token: SecretString::new(admin_token.into()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn expiration(&self, expires_in: Option<i64>) -> DateTime<Utc> {
        self.clock.now() + Duration::seconds(expires_in.unwrap_or(DEFAULT_TOKEN_DURATION_SECS))
    }
}

#[async_trait]
impl Provider for ArtifactoryProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Artifactory
    }

    async fn create(&self, request: &Request) -> Result<(Vec<Credential>, Option<Metadata>)> {
        let config: ArtifactoryRequestConfig = request.parse_config()?;

        let mut body = serde_json::Map::new();
        body.insert("username".to_string(), serde_json::json!(config.user));
        body.insert(
            "expires_in".to_string(),
            serde_json::json!(config.duration.unwrap_or(DEFAULT_TOKEN_DURATION_SECS)),
        );
        if let Some(group) = &config.group {
            body.insert(
                "scope".to_string(),
                serde_json::json!(format!("applied-permissions/groups:{group}")),
            );
        }

        let token: TokenResponse = self
            .client
            .post(format!("{}/access/api/v1/tokens", self.base_url))
            .bearer_auth(self.admin_token.expose_secret())
            .json(&body)
            .send()
            .await
            .context("failed to create artifactory token")?
            .error_for_status()
            .context("artifactory token request failed")?
            .json()
            .await
            .context("invalid artifactory token response")?;

        debug!(user = %config.user, token_id = %token.token_id, "created artifactory token");
        let expiration = self.expiration(token.expires_in);
        let credentials = vec![
            Credential::new(format!("{}-user", request.name), config.user, expiration),
            Credential::new(
                format!("{}-token", request.name),
                token.access_token,
                expiration,
            ),
        ];
        let metadata = serde_json::to_value(TokenMetadata {
            token_id: token.token_id,
        })?;
        Ok((credentials, Some(metadata)))
    }

    async fn destroy(&self, resource: &Resource) -> Result<()> {
        let Some(metadata) = &resource.metadata else {
            debug!(id = %resource.id, "no token id recorded, nothing to revoke");
            return Ok(());
        };
        let metadata: TokenMetadata = serde_json::from_value(metadata.clone())
            .context("malformed artifactory token metadata in state")?;

        let response = self
            .client
            .delete(format!(
                "{}/access/api/v1/tokens/{}",
                self.base_url, metadata.token_id
            ))
            .bearer_auth(self.admin_token.expose_secret())
            .send()
            .await
            .context("failed to revoke artifactory token")?;

        // A token that no longer exists is already revoked.
        if response.status() == StatusCode::NOT_FOUND {
            debug!(id = %resource.id, token_id = %metadata.token_id, "token already absent");
            return Ok(());
        }
        response
            .error_for_status()
            .context("artifactory token revocation failed")?;
        debug!(id = %resource.id, token_id = %metadata.token_id, "revoked artifactory token");
        Ok(())
    }
}
