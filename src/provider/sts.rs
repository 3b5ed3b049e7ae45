//! Provider for AWS STS AssumeRole sessions.
//!
//! Each request names an IAM role; a rotation mints a fresh session and
//! yields the three credentials a consumer needs to use it. Sessions lapse
//! on their own, so destroy has no upstream work to do.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::Provider;
use crate::state::Resource;
use crate::{Credential, Metadata, ProviderType, Request};

const DEFAULT_SESSION_DURATION: i32 = 3600;

#[derive(Debug, Clone, Deserialize)]
struct StsRequestConfig {
    role_arn: String,
    #[serde(default)]
    duration: Option<i32>,
}

pub struct StsProvider {
    client: aws_sdk_sts::Client,
}

impl StsProvider {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(aws_sdk_sts::Client::new(&config))
    }
}

// STS limits session names to 64 chars from [\w+=,.@-].
fn session_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c,
            '+' | '=' | ',' | '.' | '@' | '-' | '_' => c,
            _ => '-',
        })
        .take(64)
        .collect();
    if sanitized.len() < 2 {
        sanitized = format!("credrotate-{sanitized}");
    }
    sanitized
}

#[async_trait]
impl Provider for StsProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Aws
    }

    async fn create(&self, request: &Request) -> Result<(Vec<Credential>, Option<Metadata>)> {
        let config: StsRequestConfig = request.parse_config()?;

        let response = self
            .client
            .assume_role()
            .role_arn(&config.role_arn)
            .role_session_name(session_name(&request.name))
            .duration_seconds(config.duration.unwrap_or(DEFAULT_SESSION_DURATION))
            .send()
            .await
            .with_context(|| format!("failed to assume role {:?}", config.role_arn))?;

        let session = response
            .credentials()
            .context("assume role response contained no credentials")?;
        let expiry = session.expiration();
        let expiration: DateTime<Utc> =
            DateTime::from_timestamp(expiry.secs(), expiry.subsec_nanos())
                .context("assume role returned an out-of-range expiration")?;

        debug!(name = %request.name, role_arn = %config.role_arn, "assumed role");
        let credentials = vec![
            Credential::new(
                format!("{}-access-key", request.name),
                session.access_key_id(),
                expiration,
            ),
            Credential::new(
                format!("{}-secret-key", request.name),
                session.secret_access_key(),
                expiration,
            ),
            Credential::new(
                format!("{}-session-token", request.name),
                session.session_token(),
                expiration,
            ),
        ];
        Ok((credentials, None))
    }

    async fn destroy(&self, resource: &Resource) -> Result<()> {
        // Sessions cannot be revoked; they expire on their own.
        debug!(id = %resource.id, "sts sessions expire on their own");
        Ok(())
    }
}
