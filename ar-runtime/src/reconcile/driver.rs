use super::artifact::{Artifact, ArtifactKey};
use ar_common::Result;

/// Runtime-side operations the reconciler drives. One implementation
/// per target: docker compose and the Kubernetes REST API.
#[async_trait::async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Enumerates the artifacts currently present in the runtime,
    /// with their last-applied hashes.
    async fn list(&self) -> Result<Vec<Artifact>>;

    async fn apply(&self, artifact: &Artifact) -> Result<()>;

    async fn remove(&self, key: &ArtifactKey) -> Result<()>;
}
