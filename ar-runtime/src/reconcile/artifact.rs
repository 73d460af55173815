use crate::api::DesiredState;
use crate::hash::body_hash;
use crate::translate::RuntimeArtifacts;
use crate::translate::compose::COMPOSE_PROJECT_NAME;
use ar_common::Result;
use ar_common::utils::sanitize_dns_label;
use serde_json::json;
use std::collections::HashMap;
use std::fmt::Display;

pub const KIND_COMPOSE_PROJECT: &str = "compose-project";

/// Stable identity of one runtime artifact; the diff operates on keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub body: serde_json::Value,
    /// Canonical-JSON hash of the body; equality is decided on this.
    pub hash: String,
    /// Deployment rows whose status follows this artifact's fate.
    pub owners: Vec<String>,
    /// True when the artifact carries our managed-by label. Only managed
    /// artifacts are ever deleted.
    pub managed: bool,
}

impl Artifact {
    fn desired(key: ArtifactKey, body: serde_json::Value, owners: Vec<String>) -> Self {
        let hash = body_hash(&body);
        Self {
            key,
            body,
            hash,
            owners,
            managed: true,
        }
    }
}

/// Flattens translated artifacts into the keyed set the diff runs on.
/// The compose bundle reconciles as a single artifact per project; the
/// Kubernetes bundle as one artifact per custom resource.
pub fn artifacts_from(
    artifacts: &RuntimeArtifacts,
    desired: &DesiredState,
) -> Result<Vec<Artifact>> {
    let mut owners_by_name: HashMap<String, String> = HashMap::new();
    for workload in &desired.mcp_servers {
        owners_by_name.insert(workload.name.clone(), workload.owner.clone());
    }
    for agent in &desired.agents {
        let cr_name = sanitize_dns_label(&format!("{}-{}", agent.name, agent.version));
        owners_by_name.insert(cr_name, agent.owner.clone());
    }

    let owner_of = |name: &str| -> Vec<String> {
        owners_by_name.get(name).cloned().into_iter().collect()
    };

    match artifacts {
        RuntimeArtifacts::DockerCompose(bundle) => {
            // An empty desired state produces no artifact at all, which
            // makes the reconciler tear the project down.
            if desired.mcp_servers.is_empty() && desired.agents.is_empty() {
                return Ok(Vec::new());
            }
            let mut owners: Vec<String> = owners_by_name.values().cloned().collect();
            owners.sort();
            owners.dedup();

            let body = json!({
                "project": bundle.project,
                "gateway": bundle.gateway,
            });
            Ok(vec![Artifact::desired(
                ArtifactKey::new(KIND_COMPOSE_PROJECT, "", COMPOSE_PROJECT_NAME),
                body,
                owners,
            )])
        }
        RuntimeArtifacts::Kubernetes(bundle) => {
            let mut out = Vec::new();
            for resource in &bundle.agents {
                out.push(Artifact::desired(
                    ArtifactKey::new("Agent", &resource.metadata.namespace, &resource.metadata.name),
                    serde_json::to_value(resource)?,
                    owner_of(&resource.metadata.name),
                ));
            }
            for resource in &bundle.mcp_servers {
                out.push(Artifact::desired(
                    ArtifactKey::new(
                        "MCPServer",
                        &resource.metadata.namespace,
                        &resource.metadata.name,
                    ),
                    serde_json::to_value(resource)?,
                    owner_of(&resource.metadata.name),
                ));
            }
            for resource in &bundle.remote_mcp_servers {
                out.push(Artifact::desired(
                    ArtifactKey::new(
                        "RemoteMCPServer",
                        &resource.metadata.namespace,
                        &resource.metadata.name,
                    ),
                    serde_json::to_value(resource)?,
                    owner_of(&resource.metadata.name),
                ));
            }
            for resource in &bundle.config_maps {
                let agent_name = resource
                    .metadata
                    .name
                    .strip_suffix("-mcp-config")
                    .unwrap_or(&resource.metadata.name);
                out.push(Artifact::desired(
                    ArtifactKey::new(
                        "ConfigMap",
                        &resource.metadata.namespace,
                        &resource.metadata.name,
                    ),
                    serde_json::to_value(resource)?,
                    owner_of(agent_name),
                ));
            }
            Ok(out)
        }
    }
}
