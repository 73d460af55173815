pub mod compose;
pub mod kagent;

use crate::api::DesiredState;
use ar_common::Result;

/// Converts a desired state into target-runtime-native artifacts. Both
/// translators are stateless; selection happens per deployment `runtime`.
pub trait Translate: Send + Sync {
    fn translate(&self, desired: &DesiredState) -> Result<RuntimeArtifacts>;
}

/// Sum of the two artifact families; the reconciler inspects the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeArtifacts {
    DockerCompose(compose::DockerComposeBundle),
    Kubernetes(kagent::KubernetesBundle),
}
