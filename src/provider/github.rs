//! Provider for GitHub credentials, authenticated as a GitHub App.
//!
//! Serves two credential types:
//!
//! - `github:deploy-key`: generates a fresh ECDSA P-256 keypair per
//!   rotation, registers the public half on the target repository and
//!   returns the private half as the credential. Destroy deletes the
//!   registered key.
//! - `github:access-token`: mints an installation access token, optionally
//!   scoped to a list of repositories. Tokens expire upstream, so destroy
//!   is a no-op.
//!
//! App authentication follows the documented flow: a short-lived RS256 JWT
//! signed with the app's private key, exchanged for an installation token.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Provider;
use crate::clock::{Clock, SystemClock};
use crate::state::Resource;
use crate::{Credential, CredentialType, Metadata, ProviderType, Request};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const DEFAULT_KEY_LIFETIME_DAYS: i64 = 7;

// GitHub caps app JWTs at 10 minutes; stay under it and backdate iat to
// absorb clock skew.
const JWT_BACKDATE_SECS: i64 = 60;
const JWT_LIFETIME_SECS: i64 = 9 * 60;

#[derive(Debug, Clone, Deserialize)]
struct DeployKeyRequestConfig {
    owner: String,
    repository: String,
    #[serde(default = "default_read_only")]
    read_only: bool,
    #[serde(default)]
    title: Option<String>,
}

fn default_read_only() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct AccessTokenRequestConfig {
    owner: String,
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

/// Metadata recorded on deploy-key resources so destroy can find the key
/// again.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeployKeyMetadata {
    key_id: u64,
    owner: String,
    repository: String,
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct DeployKeyResponse {
    id: u64,
}

pub struct GithubProvider {
    client: reqwest::Client,
    base_url: String,
    app_id: u64,
    private_key: SecretString,
    key_lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl GithubProvider {
    pub fn new(app_id: u64, private_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            app_id,
            private_key: SecretString::new(private_key.into()),
            key_lifetime: Duration::days(DEFAULT_KEY_LIFETIME_DAYS),
            clock: Arc::new(SystemClock),
        }
    }

    /// Point the provider at a GitHub Enterprise (or test) endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// How long deploy keys live before they are rotated.
    pub fn with_key_lifetime(mut self, lifetime: Duration) -> Self {
        self.key_lifetime = lifetime;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn app_jwt(&self) -> Result<String> {
        let now = self.clock.now().timestamp();
        let claims = AppClaims {
            iat: now - JWT_BACKDATE_SECS,
            exp: now + JWT_LIFETIME_SECS,
            iss: self.app_id.to_string(),
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.expose_secret().as_bytes())
            .context("invalid GitHub App private key")?;
        encode(&Header::new(Algorithm::RS256), &claims, &key).context("failed to sign app JWT")
    }

    async fn installation_id(&self, owner: &str) -> Result<u64> {
        let jwt = self.app_jwt()?;
        for path in [
            format!("{}/orgs/{owner}/installation", self.base_url),
            format!("{}/users/{owner}/installation", self.base_url),
        ] {
            let response = self
                .client
                .get(path.as_str())
                .bearer_auth(&jwt)
                .header("accept", "application/vnd.github+json")
                .header("user-agent", "credrotate")
                .send()
                .await
                .context("failed to look up app installation")?;
            if response.status() == StatusCode::NOT_FOUND {
                continue;
            }
            let installation: InstallationResponse = response
                .error_for_status()
                .context("installation lookup failed")?
                .json()
                .await
                .context("invalid installation response")?;
            return Ok(installation.id);
        }
        bail!("app is not installed for owner {owner:?}")
    }

    async fn installation_token(
        &self,
        owner: &str,
        repositories: Option<&[String]>,
    ) -> Result<AccessTokenResponse> {
        let installation = self.installation_id(owner).await?;
        let mut body = serde_json::Map::new();
        if let Some(repositories) = repositories {
            body.insert("repositories".to_string(), serde_json::json!(repositories));
        }
        let response = self
            .client
            .post(format!(
                "{}/app/installations/{installation}/access_tokens",
                self.base_url
            ))
            .bearer_auth(self.app_jwt()?)
            .header("accept", "application/vnd.github+json")
            .header("user-agent", "credrotate")
            .json(&body)
            .send()
            .await
            .context("failed to create installation token")?
            .error_for_status()
            .context("installation token request failed")?;
        response
            .json()
            .await
            .context("invalid installation token response")
    }

    async fn create_deploy_key(&self, request: &Request) -> Result<(Vec<Credential>, Option<Metadata>)> {
        let config: DeployKeyRequestConfig = request.parse_config()?;
        let token = self
            .installation_token(&config.owner, Some(std::slice::from_ref(&config.repository)))
            .await?;

        let secret_key = p256::SecretKey::random(&mut OsRng);
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .context("failed to encode deploy key")?
            .to_string();
        let title = config.title.clone().unwrap_or_else(|| request.name.clone());
        let public_key = ssh_public_key(&secret_key.public_key(), &title);

        let response = self
            .client
            .post(format!(
                "{}/repos/{}/{}/keys",
                self.base_url, config.owner, config.repository
            ))
            .bearer_auth(&token.token)
            .header("accept", "application/vnd.github+json")
            .header("user-agent", "credrotate")
            .json(&serde_json::json!({
                "title": title,
                "key": public_key,
                "read_only": config.read_only,
            }))
            .send()
            .await
            .context("failed to register deploy key")?
            .error_for_status()
            .context("deploy key registration failed")?;
        let key: DeployKeyResponse = response.json().await.context("invalid deploy key response")?;

        debug!(
            owner = %config.owner,
            repository = %config.repository,
            key_id = key.id,
            "registered deploy key"
        );
        let metadata = serde_json::to_value(DeployKeyMetadata {
            key_id: key.id,
            owner: config.owner,
            repository: config.repository,
        })?;
        let credential = Credential::new(
            &request.name,
            private_pem,
            self.clock.now() + self.key_lifetime,
        );
        Ok((vec![credential], Some(metadata)))
    }

    async fn create_access_token(
        &self,
        request: &Request,
    ) -> Result<(Vec<Credential>, Option<Metadata>)> {
        let config: AccessTokenRequestConfig = request.parse_config()?;
        let token = self
            .installation_token(&config.owner, config.repositories.as_deref())
            .await?;
        debug!(owner = %config.owner, "minted installation access token");
        let credential = Credential::new(&request.name, token.token, token.expires_at);
        Ok((vec![credential], None))
    }
}

/// Encode a P-256 public key in the OpenSSH authorized-keys format GitHub
/// expects: `ecdsa-sha2-nistp256 <base64 wire blob> <comment>`.
fn ssh_public_key(public_key: &p256::PublicKey, comment: &str) -> String {
    fn put_string(buf: &mut Vec<u8>, data: &[u8]) {
        buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        buf.extend_from_slice(data);
    }

    let point = public_key.to_encoded_point(false);
    let mut blob = Vec::new();
    put_string(&mut blob, b"ecdsa-sha2-nistp256");
    put_string(&mut blob, b"nistp256");
    put_string(&mut blob, point.as_bytes());
    format!("ecdsa-sha2-nistp256 {} {comment}", BASE64.encode(&blob))
}

#[async_trait]
impl Provider for GithubProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Github
    }

    async fn create(&self, request: &Request) -> Result<(Vec<Credential>, Option<Metadata>)> {
        match request.credential_type {
            Some(CredentialType::GithubDeployKey) => self.create_deploy_key(request).await,
            Some(CredentialType::GithubAccessToken) => self.create_access_token(request).await,
            ref other => Err(anyhow!("github provider cannot serve credential type {other:?}")),
        }
    }

    async fn destroy(&self, resource: &Resource) -> Result<()> {
        // Access-token resources carry no metadata and expire upstream.
        let Some(metadata) = &resource.metadata else {
            debug!(id = %resource.id, "access tokens expire on their own");
            return Ok(());
        };
        let metadata: DeployKeyMetadata = serde_json::from_value(metadata.clone())
            .context("malformed deploy key metadata in state")?;

        let token = self
            .installation_token(&metadata.owner, Some(std::slice::from_ref(&metadata.repository)))
            .await?;
        let response = self
            .client
            .delete(format!(
                "{}/repos/{}/{}/keys/{}",
                self.base_url, metadata.owner, metadata.repository, metadata.key_id
            ))
            .bearer_auth(&token.token)
            .header("accept", "application/vnd.github+json")
            .header("user-agent", "credrotate")
            .send()
            .await
            .context("failed to delete deploy key")?;

        // Already gone counts as destroyed.
        if response.status() == StatusCode::NOT_FOUND {
            debug!(id = %resource.id, key_id = metadata.key_id, "deploy key already absent");
            return Ok(());
        }
        response
            .error_for_status()
            .context("deploy key deletion failed")?;
        debug!(id = %resource.id, key_id = metadata.key_id, "deleted deploy key");
        Ok(())
    }
}
