use super::{RuntimeArtifacts, Translate};
use crate::api::{DesiredState, McpServerKind, McpWorkload, TransportType};
use ar_common::{RegistryError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const COMPOSE_PROJECT_NAME: &str = "ai_registry";
pub const GATEWAY_SERVICE_NAME: &str = "agent_gateway";

const AGENT_GATEWAY_REPOSITORY: &str = "ghcr.io/agentgateway/agentgateway";
const DEFAULT_AGENT_GATEWAY_VERSION: &str = "0.9.0";

/// Env var overriding the agent-gateway image tag.
pub const TRANSPORT_ADAPTER_VERSION_ENV: &str = "TRANSPORT_ADAPTER_VERSION";

/// Tag strings are restricted to keep user input out of image references.
static VERSION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9.\-]+$").unwrap());

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComposeProject {
    pub name: String,
    #[serde(skip)]
    pub working_dir: PathBuf,
    pub services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComposeService {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ComposePort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<ComposeVolume>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComposePort {
    pub target: u16,
    pub published: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComposeVolume {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub target: String,
}

/// Routing table the agent gateway loads from `/config/local.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GatewayConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_routes: Vec<HttpRoute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdio_routes: Vec<StdioRoute>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpRoute {
    pub name: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StdioRoute {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DockerComposeBundle {
    pub project: ComposeProject,
    pub gateway: GatewayConfig,
}

/// Translates a desired state into a compose project fronted by the
/// agent gateway plus the gateway's routing config.
pub struct AgentGatewayTranslator {
    working_dir: PathBuf,
    gateway_port: u16,
}

impl AgentGatewayTranslator {
    pub fn new(working_dir: PathBuf, gateway_port: u16) -> Self {
        Self {
            working_dir,
            gateway_port,
        }
    }

    fn gateway_service(&self) -> Result<ComposeService> {
        if self.gateway_port == 0 {
            return Err(RegistryError::validation(
                "gatewayPort",
                "agent gateway port must be specified",
            ));
        }
        Ok(ComposeService {
            image: agent_gateway_image(),
            command: vec!["-f".to_string(), "/config/local.yaml".to_string()],
            ports: vec![ComposePort {
                target: self.gateway_port,
                published: self.gateway_port.to_string(),
                protocol: "tcp".to_string(),
            }],
            volumes: vec![ComposeVolume {
                kind: "bind".to_string(),
                source: self
                    .working_dir
                    .join(GATEWAY_SERVICE_NAME)
                    .to_string_lossy()
                    .into_owned(),
                target: "/config".to_string(),
            }],
            environment: BTreeMap::new(),
            labels: managed_labels(),
        })
    }

    fn mcp_service(&self, workload: &McpWorkload) -> Result<ComposeService> {
        let deployment = workload.deployment.as_ref().ok_or_else(|| {
            RegistryError::Internal(format!("local MCP server {} has no deployment", workload.name))
        })?;

        let image = match deployment.image.as_str() {
            "" if deployment.cmd == "uvx" => "ghcr.io/astral-sh/uv:debian".to_string(),
            "" if deployment.cmd == "npx" => "node:24-alpine3.21".to_string(),
            "" => {
                return Err(RegistryError::validation(
                    "image",
                    format!(
                        "image must be specified for MCPServer {} or the command must be 'uvx' or 'npx'",
                        workload.name
                    ),
                ));
            }
            image => image.to_string(),
        };

        let mut command = Vec::new();
        if !deployment.cmd.is_empty() {
            command.push(deployment.cmd.clone());
            command.extend(deployment.args.iter().cloned());
        }

        Ok(ComposeService {
            image,
            command,
            ports: Vec::new(),
            volumes: Vec::new(),
            environment: deployment.env.clone(),
            labels: managed_labels(),
        })
    }

    fn gateway_config(&self, servers: &[McpWorkload]) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        for workload in servers {
            match (workload.kind, workload.transport) {
                (McpServerKind::Remote, _) => {
                    let Some(remote) = &workload.remote else { continue };
                    config.http_routes.push(HttpRoute {
                        name: workload.name.clone(),
                        to: remote.url(),
                        headers: remote.headers.clone(),
                    });
                }
                (McpServerKind::Local, TransportType::Http) => {
                    let Some(http) = &workload.http else { continue };
                    config.http_routes.push(HttpRoute {
                        name: workload.name.clone(),
                        to: format!("http://{}:{}{}", workload.name, http.target_port, http.path),
                        headers: BTreeMap::new(),
                    });
                }
                (McpServerKind::Local, TransportType::Stdio) => {
                    let Some(deployment) = &workload.deployment else { continue };
                    config.stdio_routes.push(StdioRoute {
                        name: workload.name.clone(),
                        cmd: deployment.cmd.clone(),
                        args: deployment.args.clone(),
                        env: deployment.env.clone(),
                        image: deployment.image.clone(),
                    });
                }
            }
        }
        config
    }
}

impl Translate for AgentGatewayTranslator {
    fn translate(&self, desired: &DesiredState) -> Result<RuntimeArtifacts> {
        let mut services = BTreeMap::new();
        services.insert(GATEWAY_SERVICE_NAME.to_string(), self.gateway_service()?);

        for workload in &desired.mcp_servers {
            // stdio servers run inside the gateway via its stdio adapter;
            // only http servers get a standalone service.
            if workload.kind != McpServerKind::Local || workload.transport != TransportType::Http {
                continue;
            }
            if services.contains_key(&workload.name) {
                return Err(RegistryError::validation(
                    "name",
                    format!("duplicate MCPServer name found: {}", workload.name),
                ));
            }
            services.insert(workload.name.clone(), self.mcp_service(workload)?);
        }

        Ok(RuntimeArtifacts::DockerCompose(DockerComposeBundle {
            project: ComposeProject {
                name: COMPOSE_PROJECT_NAME.to_string(),
                working_dir: self.working_dir.clone(),
                services,
            },
            gateway: self.gateway_config(&desired.mcp_servers),
        }))
    }
}

fn managed_labels() -> BTreeMap<String, String> {
    [(
        "app.kubernetes.io/managed-by".to_string(),
        "agentregistry".to_string(),
    )]
    .into()
}

/// Agent gateway image, honoring `TRANSPORT_ADAPTER_VERSION` when the
/// tag passes validation, falling back to the default otherwise.
pub fn agent_gateway_image() -> String {
    gateway_image_for(&std::env::var(TRANSPORT_ADAPTER_VERSION_ENV).unwrap_or_default())
}

fn gateway_image_for(version: &str) -> String {
    if version.is_empty() {
        return format!("{AGENT_GATEWAY_REPOSITORY}:{DEFAULT_AGENT_GATEWAY_VERSION}-musl");
    }

    if !valid_version(version) {
        tracing::warn!(
            "Invalid {}: {}, fallback to {}",
            TRANSPORT_ADAPTER_VERSION_ENV,
            version,
            DEFAULT_AGENT_GATEWAY_VERSION
        );
        return format!("{AGENT_GATEWAY_REPOSITORY}:{DEFAULT_AGENT_GATEWAY_VERSION}-musl");
    }

    format!("{AGENT_GATEWAY_REPOSITORY}:{version}-musl")
}

pub fn valid_version(version: &str) -> bool {
    VERSION_REGEX.is_match(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{HttpTransport, RemoteEndpoint, WorkloadDeployment};
    use ar_common::types::HttpScheme;

    fn translator() -> AgentGatewayTranslator {
        AgentGatewayTranslator::new(PathBuf::from("/tmp/arctl-test"), 21212)
    }

    fn stdio_workload(name: &str, image: &str) -> McpWorkload {
        McpWorkload {
            name: name.to_string(),
            kind: McpServerKind::Local,
            transport: TransportType::Stdio,
            deployment: Some(WorkloadDeployment {
                image: image.to_string(),
                ..Default::default()
            }),
            http: None,
            remote: None,
            owner: name.to_string(),
        }
    }

    fn http_workload(name: &str, cmd: &str) -> McpWorkload {
        McpWorkload {
            name: name.to_string(),
            kind: McpServerKind::Local,
            transport: TransportType::Http,
            deployment: Some(WorkloadDeployment {
                cmd: cmd.to_string(),
                port: 3000,
                ..Default::default()
            }),
            http: Some(HttpTransport {
                target_port: 3000,
                path: "/mcp".to_string(),
            }),
            remote: None,
            owner: name.to_string(),
        }
    }

    fn unwrap_compose(artifacts: RuntimeArtifacts) -> DockerComposeBundle {
        match artifacts {
            RuntimeArtifacts::DockerCompose(bundle) => bundle,
            RuntimeArtifacts::Kubernetes(_) => panic!("expected a compose bundle"),
        }
    }

    #[test]
    fn test_stdio_server_routes_through_gateway_only() {
        let desired = DesiredState {
            agents: vec![],
            mcp_servers: vec![stdio_workload(
                "io-github-github-github-mcp-server",
                "ghcr.io/github/github-mcp-server:latest",
            )],
        };

        let bundle = unwrap_compose(translator().translate(&desired).unwrap());

        // One compose service: the gateway. stdio servers are launched
        // inside it.
        assert_eq!(bundle.project.name, "ai_registry");
        assert_eq!(bundle.project.services.len(), 1);
        assert!(bundle.project.services.contains_key("agent_gateway"));

        let gateway = &bundle.project.services["agent_gateway"];
        assert_eq!(gateway.command, vec!["-f", "/config/local.yaml"]);
        assert_eq!(gateway.ports[0].published, "21212");

        assert_eq!(bundle.gateway.stdio_routes.len(), 1);
        assert_eq!(
            bundle.gateway.stdio_routes[0].image,
            "ghcr.io/github/github-mcp-server:latest"
        );
        assert!(bundle.gateway.http_routes.is_empty());
    }

    #[test]
    fn test_http_server_image_defaulting() {
        let desired = DesiredState {
            agents: vec![],
            mcp_servers: vec![http_workload("uv-server", "uvx"), http_workload("node-server", "npx")],
        };

        let bundle = unwrap_compose(translator().translate(&desired).unwrap());
        assert_eq!(
            bundle.project.services["uv-server"].image,
            "ghcr.io/astral-sh/uv:debian"
        );
        assert_eq!(bundle.project.services["node-server"].image, "node:24-alpine3.21");

        let routes: Vec<&str> = bundle
            .gateway
            .http_routes
            .iter()
            .map(|r| r.to.as_str())
            .collect();
        assert!(routes.contains(&"http://uv-server:3000/mcp"));
        assert!(routes.contains(&"http://node-server:3000/mcp"));
    }

    #[test]
    fn test_http_server_without_image_or_known_cmd_errors() {
        let desired = DesiredState {
            agents: vec![],
            mcp_servers: vec![http_workload("mystery", "python")],
        };
        let err = translator().translate(&desired).unwrap_err();
        assert!(err.to_string().contains("image must be specified"));
    }

    #[test]
    fn test_duplicate_service_names_error() {
        let desired = DesiredState {
            agents: vec![],
            mcp_servers: vec![http_workload("dup", "npx"), http_workload("dup", "uvx")],
        };
        let err = translator().translate(&desired).unwrap_err();
        assert!(err.to_string().contains("duplicate MCPServer name"));
    }

    #[test]
    fn test_remote_server_becomes_http_route_with_headers() {
        let desired = DesiredState {
            agents: vec![],
            mcp_servers: vec![McpWorkload {
                name: "brave-search".to_string(),
                kind: McpServerKind::Remote,
                transport: TransportType::Http,
                deployment: None,
                http: None,
                remote: Some(RemoteEndpoint {
                    host: "mcp.example.io".to_string(),
                    port: 443,
                    path: "/mcp".to_string(),
                    scheme: HttpScheme::Https,
                    headers: [("X-Tok".to_string(), "z".to_string())].into(),
                }),
                owner: "io.example/search".to_string(),
            }],
        };

        let bundle = unwrap_compose(translator().translate(&desired).unwrap());
        assert_eq!(bundle.project.services.len(), 1);
        assert_eq!(bundle.gateway.http_routes.len(), 1);

        let route = &bundle.gateway.http_routes[0];
        assert_eq!(route.to, "https://mcp.example.io/mcp");
        assert_eq!(route.headers.get("X-Tok").map(String::as_str), Some("z"));
    }

    #[test]
    fn test_translation_is_deterministic_and_idempotent() {
        let desired = DesiredState {
            agents: vec![],
            mcp_servers: vec![
                stdio_workload("b-server", "ghcr.io/x/b:1"),
                http_workload("a-server", "npx"),
            ],
        };

        let translator = translator();
        let first = unwrap_compose(translator.translate(&desired).unwrap());
        let second = unwrap_compose(translator.translate(&desired).unwrap());
        assert_eq!(first, second);
        assert_eq!(
            serde_yaml::to_string(&first.project).unwrap(),
            serde_yaml::to_string(&second.project).unwrap()
        );
    }

    #[test]
    fn test_version_validation() {
        assert!(valid_version("0.9.0"));
        assert!(valid_version("1.2.3-rc.1"));
        assert!(valid_version("latest"));
        assert!(!valid_version("0.9.0; rm -rf /"));
        assert!(!valid_version("v1/evil"));
        assert!(!valid_version(""));
        assert!(!valid_version("tag with spaces"));
    }

    #[test]
    fn test_gateway_image_fallback_on_invalid_tag() {
        assert_eq!(
            gateway_image_for("bad tag!"),
            "ghcr.io/agentgateway/agentgateway:0.9.0-musl"
        );
        assert_eq!(
            gateway_image_for(""),
            "ghcr.io/agentgateway/agentgateway:0.9.0-musl"
        );
        assert_eq!(
            gateway_image_for("0.10.1"),
            "ghcr.io/agentgateway/agentgateway:0.10.1-musl"
        );
    }
}
