//! Credential providers.
//!
//! A provider mints credentials of the types it serves and destroys the
//! upstream resources backing them. Implementations:
//!
//! - [`random::RandomProvider`] - locally generated random values
//! - [`sts::StsProvider`] - AWS STS AssumeRole sessions
//! - [`github::GithubProvider`] - GitHub deploy keys and installation
//!   access tokens
//! - [`artifactory::ArtifactoryProvider`] - Artifactory access tokens

use anyhow::Result;
use async_trait::async_trait;

use crate::state::Resource;
use crate::{Credential, Metadata, ProviderType, Request};

pub mod artifactory;
pub mod github;
pub mod random;
pub mod sts;

pub use artifactory::ArtifactoryProvider;
pub use github::GithubProvider;
pub use random::RandomProvider;
pub use sts::StsProvider;

/// Contract implemented by every credential provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The provider type, which keys the provider partition in state and
    /// resolves which credential types this provider serves.
    fn provider_type(&self) -> ProviderType;

    /// Mint credentials for a request. Returns at least one credential on
    /// success, plus optional metadata the provider wants back when the
    /// resource is destroyed.
    async fn create(&self, request: &Request) -> Result<(Vec<Credential>, Option<Metadata>)>;

    /// Destroy the upstream resource backing previously minted
    /// credentials. Idempotent: destroying an already-absent resource is
    /// success.
    async fn destroy(&self, resource: &Resource) -> Result<()>;
}
