//! # credrotate
//!
//! A credential-management sidecar. A declarative config describes a set of
//! credential requests and the stores they should land in; the reconciler
//! compares those requests against persisted state, asks credential
//! providers to mint what is missing or due for rotation, writes the
//! resulting secrets to the configured stores, and destroys anything that
//! is expired, deposed, or no longer requested.
//!
//! The crate is organized around three contracts:
//!
//! - [`provider::Provider`] mints and destroys credentials of a given type
//!   (AWS STS sessions, GitHub deploy keys and access tokens, Artifactory
//!   tokens, random strings),
//! - [`store::SecretStore`] persists credential values at addressable paths
//!   (AWS Secrets Manager, AWS Parameter Store, local files, in-process),
//! - [`backend::StateBackend`] loads and saves the state document between
//!   reconciliation passes (local file, S3).
//!
//! [`reconciler::Reconciler::process`] is the engine that ties them
//! together.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod backend;
pub mod clock;
pub mod config;
pub mod duration;
pub mod provider;
pub mod reconciler;
pub mod state;
pub mod store;
pub mod template;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Config, CredentialRequest, Request, StoreConfig, ValidationError};
pub use provider::Provider;
pub use reconciler::{ProcessError, Reconciler, ReconcilerError};
pub use state::{ProviderState, Resource, Secret, State, StoreState};
pub use store::SecretStore;

/// Opaque provider bookkeeping attached to a [`Resource`] when it is
/// created and handed back to the provider when it is destroyed. The core
/// never looks inside.
pub type Metadata = serde_json::Value;

/// The type of credential a request asks for.
///
/// The recognized set is closed from the validator's point of view, but the
/// engine dispatches on the raw tag so hosts can register custom providers
/// (tests do this with a `fake` type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CredentialType {
    AwsSts,
    GithubAccessToken,
    GithubDeployKey,
    ArtifactoryAccessToken,
    Random,
    Other(String),
}

impl CredentialType {
    /// Whether this is one of the recognized credential types.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, CredentialType::Other(_))
    }

    /// The provider that serves this credential type. Both GitHub
    /// credential types resolve to the one GitHub provider.
    pub fn provider_type(&self) -> ProviderType {
        match self {
            CredentialType::AwsSts => ProviderType::Aws,
            CredentialType::GithubAccessToken | CredentialType::GithubDeployKey => {
                ProviderType::Github
            }
            CredentialType::ArtifactoryAccessToken => ProviderType::Artifactory,
            CredentialType::Random => ProviderType::Random,
            CredentialType::Other(s) => ProviderType::Other(s.clone()),
        }
    }
}

impl From<&str> for CredentialType {
    fn from(s: &str) -> Self {
        match s {
            "aws:sts" => CredentialType::AwsSts,
            "github:access-token" => CredentialType::GithubAccessToken,
            "github:deploy-key" => CredentialType::GithubDeployKey,
            "artifactory:access-token" => CredentialType::ArtifactoryAccessToken,
            "random" => CredentialType::Random,
            other => CredentialType::Other(other.to_string()),
        }
    }
}

impl From<String> for CredentialType {
    fn from(s: String) -> Self {
        s.as_str().into()
    }
}

impl From<CredentialType> for String {
    fn from(t: CredentialType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialType::AwsSts => "aws:sts",
            CredentialType::GithubAccessToken => "github:access-token",
            CredentialType::GithubDeployKey => "github:deploy-key",
            CredentialType::ArtifactoryAccessToken => "artifactory:access-token",
            CredentialType::Random => "random",
            CredentialType::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// Identifies a provider implementation and keys the provider partitions in
/// [`State`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderType {
    Aws,
    Github,
    Artifactory,
    Random,
    Other(String),
}

impl From<&str> for ProviderType {
    fn from(s: &str) -> Self {
        match s {
            "aws" => ProviderType::Aws,
            "github" => ProviderType::Github,
            "artifactory" => ProviderType::Artifactory,
            "random" => ProviderType::Random,
            other => ProviderType::Other(other.to_string()),
        }
    }
}

impl From<String> for ProviderType {
    fn from(s: String) -> Self {
        s.as_str().into()
    }
}

impl From<ProviderType> for String {
    fn from(t: ProviderType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderType::Aws => "aws",
            ProviderType::Github => "github",
            ProviderType::Artifactory => "artifactory",
            ProviderType::Random => "random",
            ProviderType::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// Identifies a secret store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    SecretsManager,
    Ssm,
    File,
    Inprocess,
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreType::SecretsManager => "secretsmanager",
            StoreType::Ssm => "ssm",
            StoreType::File => "file",
            StoreType::Inprocess => "inprocess",
        };
        f.write_str(s)
    }
}

/// A minted credential on its way to a store. The value is wrapped in
/// [`SecretString`] so it never shows up in `Debug` output or logs.
#[derive(Debug)]
pub struct Credential {
    pub name: String,
    pub value: SecretString,
    pub expiration: DateTime<Utc>,
}

impl Credential {
    pub fn new(name: impl Into<String>, value: impl Into<String>, expiration: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value: SecretString::new(value.into()),
            expiration,
        }
    }
}
