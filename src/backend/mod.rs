//! State persistence backends.
//!
//! The reconciler works on an in-memory [`State`]; the host loads it
//! before a pass and saves it afterwards. Backends must provide
//! at-least-once read/write; serializing concurrent reconcilers is the
//! host's responsibility.

use anyhow::Result;
use async_trait::async_trait;

use crate::State;

pub mod file;
pub mod s3;

pub use file::FileBackend;
pub use s3::S3Backend;

#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load the state document. A backend with no stored document yet
    /// returns an empty state; a document that exists but does not parse
    /// is an error (resuming from garbage would orphan real resources).
    async fn load(&self) -> Result<State>;

    /// Persist the state document, replacing any previous version.
    async fn save(&self, state: &State) -> Result<()>;
}
