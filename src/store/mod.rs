//! Secret stores.
//!
//! A store persists credential values at addressable paths. The path is
//! chosen by the store (usually from a configurable template) and recorded
//! in state so the value can be deleted when its resource goes away.
//!
//! Implementations:
//!
//! - [`inprocess::InprocessStore`] - in-memory map, used by tests and dry
//!   runs
//! - [`file::FileStore`] - one file per credential under a root directory
//! - [`secretsmanager::SecretsManagerStore`] - AWS Secrets Manager
//! - [`ssm::SsmStore`] - AWS Systems Manager Parameter Store

use anyhow::Result;
use async_trait::async_trait;

use crate::{Credential, StoreType};

pub mod file;
pub mod inprocess;
pub mod secretsmanager;
pub mod ssm;

pub use file::FileStore;
pub use inprocess::InprocessStore;
pub use secretsmanager::SecretsManagerStore;
pub use ssm::SsmStore;

/// Contract implemented by every secret store.
///
/// The `config` parameter is the store's opaque blob from the
/// configuration file; its schema is private to the implementation.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// The store type this implementation is registered under.
    fn store_type(&self) -> StoreType;

    /// Persist a credential value and return the path it was written to.
    /// Overwrites any existing value at that path.
    async fn write(
        &self,
        namespace: &str,
        credential: &Credential,
        config: Option<&serde_json::Value>,
    ) -> Result<String>;

    /// Read the value at a path. Returns `Ok(None)` when nothing is
    /// stored there. Not used by the reconciliation loop; exists for
    /// introspection and tests.
    async fn read(&self, path: &str, config: Option<&serde_json::Value>) -> Result<Option<String>>;

    /// Delete the value at a path. Idempotent: deleting an absent path is
    /// success.
    async fn delete(&self, path: &str, config: Option<&serde_json::Value>) -> Result<()>;
}
