use super::{RuntimeArtifacts, Translate};
use crate::api::{DesiredState, McpServerKind, McpWorkload, TransportType};
use crate::builder::KAGENT_NAMESPACE_ENV;
use ar_common::utils::sanitize_dns_label;
use ar_common::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KAGENT_API_VERSION: &str = "kagent.dev/v1alpha1";
pub const DEFAULT_NAMESPACE: &str = "default";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "agentregistry";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    fn managed(name: String, namespace: String) -> Self {
        Self {
            name,
            namespace,
            labels: [(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())].into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentResource {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: AgentSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub byo: ByoSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ByoSpec {
    pub deployment: ByoDeployment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ByoDeployment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub config_map: ConfigMapRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerResource {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: McpServerSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerSpec {
    pub transport_type: String,
    pub deployment: ByoDeployment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMcpServerResource {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: RemoteMcpServerSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMcpServerSpec {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapResource {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KubernetesBundle {
    pub agents: Vec<AgentResource>,
    pub mcp_servers: Vec<McpServerResource>,
    pub remote_mcp_servers: Vec<RemoteMcpServerResource>,
    pub config_maps: Vec<ConfigMapResource>,
}

/// Translates a desired state into kagent custom resources.
pub struct KagentTranslator {
    default_namespace: String,
}

impl KagentTranslator {
    pub fn new() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: namespace.into(),
        }
    }

    fn translate_mcp(&self, workload: &McpWorkload, bundle: &mut KubernetesBundle) -> Result<()> {
        match workload.kind {
            McpServerKind::Remote => {
                let remote = workload.remote.as_ref().ok_or_else(|| {
                    RegistryError::Internal(format!(
                        "remote MCP server {} has no endpoint",
                        workload.name
                    ))
                })?;
                bundle.remote_mcp_servers.push(RemoteMcpServerResource {
                    api_version: KAGENT_API_VERSION.to_string(),
                    kind: "RemoteMCPServer".to_string(),
                    metadata: ObjectMeta::managed(
                        workload.name.clone(),
                        self.default_namespace.clone(),
                    ),
                    spec: RemoteMcpServerSpec {
                        url: remote.url(),
                        headers: remote.headers.clone(),
                    },
                });
            }
            McpServerKind::Local => {
                let deployment = workload.deployment.as_ref().ok_or_else(|| {
                    RegistryError::Internal(format!(
                        "local MCP server {} has no deployment",
                        workload.name
                    ))
                })?;

                // KAGENT_NAMESPACE promotes to metadata.namespace and
                // leaves the container env.
                let mut env = deployment.env.clone();
                let namespace = env
                    .remove(KAGENT_NAMESPACE_ENV)
                    .unwrap_or_else(|| self.default_namespace.clone());

                bundle.mcp_servers.push(McpServerResource {
                    api_version: KAGENT_API_VERSION.to_string(),
                    kind: "MCPServer".to_string(),
                    metadata: ObjectMeta::managed(workload.name.clone(), namespace),
                    spec: McpServerSpec {
                        transport_type: match workload.transport {
                            TransportType::Stdio => "stdio".to_string(),
                            TransportType::Http => "http".to_string(),
                        },
                        deployment: ByoDeployment {
                            image: deployment.image.clone(),
                            port: deployment.port,
                            cmd: deployment.cmd.clone(),
                            args: deployment.args.clone(),
                            env,
                            volumes: Vec::new(),
                            volume_mounts: Vec::new(),
                        },
                    },
                });
            }
        }
        Ok(())
    }
}

impl Default for KagentTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translate for KagentTranslator {
    fn translate(&self, desired: &DesiredState) -> Result<RuntimeArtifacts> {
        let mut bundle = KubernetesBundle::default();

        for workload in &desired.mcp_servers {
            self.translate_mcp(workload, &mut bundle)?;
        }

        for agent in &desired.agents {
            let agent_name = sanitize_dns_label(&format!("{}-{}", agent.name, agent.version));
            let mut deployment = ByoDeployment {
                image: agent.deployment.image.clone(),
                port: agent.deployment.port,
                cmd: agent.deployment.cmd.clone(),
                args: agent.deployment.args.clone(),
                env: agent.deployment.env.clone(),
                volumes: Vec::new(),
                volume_mounts: Vec::new(),
            };

            if !agent.resolved_mcp_servers.is_empty() {
                let config_map_name = format!("{agent_name}-mcp-config");
                let refs = serde_json::to_string(&agent.resolved_mcp_servers)?;
                bundle.config_maps.push(ConfigMapResource {
                    api_version: "v1".to_string(),
                    kind: "ConfigMap".to_string(),
                    metadata: ObjectMeta::managed(
                        config_map_name.clone(),
                        self.default_namespace.clone(),
                    ),
                    data: [("mcp-servers.json".to_string(), refs)].into(),
                });

                deployment.volumes.push(Volume {
                    name: "mcp-config".to_string(),
                    config_map: ConfigMapRef {
                        name: config_map_name,
                    },
                });
                deployment.volume_mounts.push(VolumeMount {
                    name: "mcp-config".to_string(),
                    mount_path: "/config".to_string(),
                });
            }

            bundle.agents.push(AgentResource {
                api_version: KAGENT_API_VERSION.to_string(),
                kind: "Agent".to_string(),
                metadata: ObjectMeta::managed(agent_name, self.default_namespace.clone()),
                spec: AgentSpec {
                    kind: "BYO".to_string(),
                    byo: ByoSpec { deployment },
                },
            });
        }

        Ok(RuntimeArtifacts::Kubernetes(bundle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        AgentWorkload, HttpTransport, MCP_REF_COMMAND, MCP_REF_REMOTE, RemoteEndpoint,
        ResolvedMcpRef, WorkloadDeployment,
    };
    use ar_common::types::HttpScheme;

    fn unwrap_kubernetes(artifacts: RuntimeArtifacts) -> KubernetesBundle {
        match artifacts {
            RuntimeArtifacts::Kubernetes(bundle) => bundle,
            RuntimeArtifacts::DockerCompose(_) => panic!("expected a kubernetes bundle"),
        }
    }

    #[test]
    fn test_agent_only() {
        let desired = DesiredState {
            agents: vec![AgentWorkload {
                name: "test-agent".to_string(),
                version: "v1".to_string(),
                deployment: WorkloadDeployment {
                    image: "agent-image:latest".to_string(),
                    env: [("ENV_VAR".to_string(), "value".to_string())].into(),
                    ..Default::default()
                },
                resolved_mcp_servers: vec![],
                owner: "test-agent".to_string(),
            }],
            mcp_servers: vec![],
        };

        let bundle = unwrap_kubernetes(KagentTranslator::new().translate(&desired).unwrap());

        assert_eq!(bundle.agents.len(), 1);
        let agent = &bundle.agents[0];
        assert_eq!(agent.metadata.name, "test-agent-v1");
        assert_eq!(agent.metadata.namespace, "default");

        // No config maps or volumes for a simple agent.
        assert!(bundle.config_maps.is_empty());
        assert!(agent.spec.byo.deployment.volumes.is_empty());
    }

    #[test]
    fn test_remote_mcp_server() {
        let desired = DesiredState {
            agents: vec![],
            mcp_servers: vec![McpWorkload {
                name: "remote-server".to_string(),
                kind: McpServerKind::Remote,
                transport: TransportType::Http,
                deployment: None,
                http: None,
                remote: Some(RemoteEndpoint {
                    host: "example.com".to_string(),
                    port: 8080,
                    path: "/mcp".to_string(),
                    scheme: HttpScheme::Http,
                    headers: BTreeMap::new(),
                }),
                owner: "remote-server".to_string(),
            }],
        };

        let bundle = unwrap_kubernetes(KagentTranslator::new().translate(&desired).unwrap());

        assert_eq!(bundle.remote_mcp_servers.len(), 1);
        let remote = &bundle.remote_mcp_servers[0];
        assert_eq!(remote.metadata.name, "remote-server");
        assert_eq!(remote.spec.url, "http://example.com:8080/mcp");
    }

    #[test]
    fn test_local_mcp_namespace_override() {
        let desired = DesiredState {
            agents: vec![],
            mcp_servers: vec![McpWorkload {
                name: "local-server".to_string(),
                kind: McpServerKind::Local,
                transport: TransportType::Http,
                deployment: Some(WorkloadDeployment {
                    image: "mcp-image:latest".to_string(),
                    env: [("KAGENT_NAMESPACE".to_string(), "custom-ns".to_string())].into(),
                    ..Default::default()
                }),
                http: Some(HttpTransport {
                    target_port: 3000,
                    path: "/sse".to_string(),
                }),
                remote: None,
                owner: "local-server".to_string(),
            }],
        };

        let bundle = unwrap_kubernetes(KagentTranslator::new().translate(&desired).unwrap());

        assert_eq!(bundle.mcp_servers.len(), 1);
        let server = &bundle.mcp_servers[0];
        assert_eq!(server.metadata.name, "local-server");
        assert_eq!(server.metadata.namespace, "custom-ns");
        assert_eq!(server.spec.transport_type, "http");
        // The override is promoted out of the container env.
        assert!(!server.spec.deployment.env.contains_key("KAGENT_NAMESPACE"));
    }

    #[test]
    fn test_agent_with_mcp_servers() {
        let desired = DesiredState {
            agents: vec![AgentWorkload {
                name: "test-agent".to_string(),
                version: "v1".to_string(),
                deployment: WorkloadDeployment {
                    image: "agent-image:latest".to_string(),
                    env: [("ENV_VAR".to_string(), "value".to_string())].into(),
                    ..Default::default()
                },
                resolved_mcp_servers: vec![
                    ResolvedMcpRef {
                        name: "sqlite".to_string(),
                        kind: MCP_REF_COMMAND.to_string(),
                        url: String::new(),
                        headers: BTreeMap::new(),
                    },
                    ResolvedMcpRef {
                        name: "brave-search".to_string(),
                        kind: MCP_REF_REMOTE.to_string(),
                        url: "http://brave-search:8080/mcp".to_string(),
                        headers: [("X-Custom".to_string(), "header-value".to_string())].into(),
                    },
                ],
                owner: "test-agent".to_string(),
            }],
            mcp_servers: vec![],
        };

        let bundle = unwrap_kubernetes(KagentTranslator::new().translate(&desired).unwrap());

        assert_eq!(bundle.config_maps.len(), 1);
        let cm = &bundle.config_maps[0];
        assert_eq!(cm.metadata.name, "test-agent-v1-mcp-config");

        let json = cm.data.get("mcp-servers.json").expect("mcp-servers.json");
        let saved: Vec<ResolvedMcpRef> = serde_json::from_str(json).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].url, "http://brave-search:8080/mcp");
        assert_eq!(
            saved[1].headers.get("X-Custom").map(String::as_str),
            Some("header-value")
        );

        assert_eq!(bundle.agents.len(), 1);
        let deployment = &bundle.agents[0].spec.byo.deployment;

        let volume = deployment
            .volumes
            .iter()
            .find(|v| v.name == "mcp-config")
            .expect("mcp-config volume");
        assert_eq!(volume.config_map.name, "test-agent-v1-mcp-config");

        assert!(
            deployment
                .volume_mounts
                .iter()
                .any(|m| m.name == "mcp-config" && m.mount_path == "/config")
        );
    }
}
