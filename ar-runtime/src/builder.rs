use crate::api::{
    AgentWorkload, DesiredState, HttpTransport, MCP_REF_COMMAND, MCP_REF_REMOTE, McpServerKind,
    McpWorkload, RemoteEndpoint, ResolvedMcpRef, TransportType, WorkloadDeployment,
};
use ar_common::types::HttpScheme;
use ar_common::utils::sanitize_dns_label;
use ar_common::{RegistryError, Result};
use ar_registry::deployment::{
    Deployment, DeploymentStatus, DeploymentStore, ResourceType, RuntimeTarget,
};
use ar_registry::model::{
    AgentDetail, ManifestKind, ManifestStatus, Package, RegistryType, ServerDetail,
    TRANSPORT_STDIO,
};
use ar_registry::store::ManifestStore;
use ar_registry::validators::transport;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

/// Config key prefixes that partition a deployment's flat config map.
const ARG_PREFIX: &str = "ARG_";
const HEADER_PREFIX: &str = "HEADER_";

/// Env key that overrides the Kubernetes resource namespace.
pub const KAGENT_NAMESPACE_ENV: &str = "KAGENT_NAMESPACE";

#[derive(Debug, Default, PartialEq)]
pub struct ConfigParts {
    pub env: BTreeMap<String, String>,
    pub args: Vec<String>,
    pub headers: BTreeMap<String, String>,
}

/// Splits a deployment config map: `ARG_*` keys become positional args
/// (prefix stripped, key order), `HEADER_*` keys become headers, the rest
/// is environment.
pub fn partition_config(config: &BTreeMap<String, String>) -> ConfigParts {
    let mut parts = ConfigParts::default();
    for (key, value) in config {
        if key.strip_prefix(ARG_PREFIX).is_some() {
            parts.args.push(value.clone());
        } else if let Some(name) = key.strip_prefix(HEADER_PREFIX) {
            parts.headers.insert(name.to_string(), value.clone());
        } else {
            parts.env.insert(key.clone(), value.clone());
        }
    }
    parts
}

/// Joins the deployment set with the registry into a `DesiredState` for
/// one runtime target. Rows whose manifest is missing, inactive, or not
/// deployable on the target are flipped to `failed` and skipped.
pub struct DesiredStateBuilder {
    manifests: Arc<dyn ManifestStore>,
    deployments: Arc<dyn DeploymentStore>,
}

impl DesiredStateBuilder {
    pub fn new(manifests: Arc<dyn ManifestStore>, deployments: Arc<dyn DeploymentStore>) -> Self {
        Self {
            manifests,
            deployments,
        }
    }

    pub async fn build(&self, target: RuntimeTarget) -> Result<DesiredState> {
        let rows: Vec<Deployment> = self
            .deployments
            .get_all()
            .await?
            .into_iter()
            .filter(|row| row.runtime == target && row.status != DeploymentStatus::Stopped)
            .collect();

        let mut state = DesiredState::default();
        let mut taken = HashSet::new();

        // MCP servers first: agents resolve references into them.
        for row in rows.iter().filter(|r| r.resource_type == ResourceType::Mcp) {
            match self.build_mcp(row, target).await {
                Ok(Some(workload)) => {
                    if !taken.insert(workload.name.clone()) {
                        return Err(RegistryError::validation(
                            "name",
                            format!("duplicate internal name: {}", workload.name),
                        ));
                    }
                    state.mcp_servers.push(workload);
                }
                Ok(None) => {}
                Err(err) => self.fail(row, &err).await,
            }
        }

        for row in rows.iter().filter(|r| r.resource_type == ResourceType::Agent) {
            match self.build_agent(row, &state.mcp_servers).await {
                Ok(Some(workload)) => {
                    if !taken.insert(workload.name.clone()) {
                        return Err(RegistryError::validation(
                            "name",
                            format!("duplicate internal name: {}", workload.name),
                        ));
                    }
                    state.agents.push(workload);
                }
                Ok(None) => {}
                Err(err) => self.fail(row, &err).await,
            }
        }

        Ok(state)
    }

    async fn fail(&self, row: &Deployment, err: &RegistryError) {
        tracing::warn!("Deployment {} failed to resolve: {}", row.server_name, err);
        if let Err(status_err) = self
            .deployments
            .set_status(
                &row.server_name,
                DeploymentStatus::Failed,
                Some(err.to_string()),
            )
            .await
        {
            tracing::error!(
                "Failed to mark deployment {} as failed: {}",
                row.server_name,
                status_err
            );
        }
    }

    async fn manifest_document(
        &self,
        kind: ManifestKind,
        row: &Deployment,
    ) -> Result<serde_json::Value> {
        let record = self
            .manifests
            .get(kind, &row.server_name, &row.version)
            .await?
            .ok_or_else(|| {
                RegistryError::NotFound(format!("{kind} {}@{}", row.server_name, row.version))
            })?;
        if record.status != ManifestStatus::Active {
            return Err(RegistryError::validation(
                "version",
                format!(
                    "{kind} {}@{} is {}",
                    row.server_name, row.version, record.status
                ),
            ));
        }
        Ok(record.document)
    }

    async fn build_mcp(&self, row: &Deployment, target: RuntimeTarget) -> Result<Option<McpWorkload>> {
        let document = self.manifest_document(ManifestKind::Server, row).await?;
        let server: ServerDetail = serde_json::from_value(document)
            .map_err(|err| RegistryError::Internal(format!("corrupt server document: {err}")))?;

        let parts = partition_config(&row.config);
        let internal = sanitize_dns_label(&server.name);

        if row.prefer_remote && !server.remotes.is_empty() {
            let remote = &server.remotes[0];
            let mut endpoint = parse_endpoint(&remote.url)?;
            for header in &remote.headers {
                endpoint
                    .headers
                    .insert(header.name.clone(), header.value.clone());
            }
            // Deploy-time headers win over manifest ones.
            endpoint.headers.extend(parts.headers.clone());

            return Ok(Some(McpWorkload {
                name: internal,
                kind: McpServerKind::Remote,
                transport: TransportType::Http,
                deployment: None,
                http: None,
                remote: Some(endpoint),
                owner: row.server_name.clone(),
            }));
        }

        let Some(pkg) = server
            .packages
            .iter()
            .find(|pkg| package_supported(target, &pkg.registry_type))
        else {
            return Err(RegistryError::validation(
                "packages",
                format!("no deployable package for runtime {target}"),
            ));
        };

        Ok(Some(self.package_workload(row, &internal, pkg, parts)?))
    }

    fn package_workload(
        &self,
        row: &Deployment,
        internal: &str,
        pkg: &Package,
        parts: ConfigParts,
    ) -> Result<McpWorkload> {
        let registry = RegistryType::from_str(&pkg.registry_type)
            .map_err(|reason| RegistryError::validation("registryType", reason))?;

        let (transport_kind, transport_url) = transport::resolve(&pkg.transport.kind, &pkg.transport.url)?;

        let mut deployment = WorkloadDeployment {
            env: parts.env,
            ..Default::default()
        };

        match registry {
            RegistryType::Oci => {
                deployment.image = pkg.identifier.clone();
                deployment.cmd = pkg.runtime_hint.clone();
            }
            RegistryType::Npm | RegistryType::Pypi => {
                deployment.cmd = if pkg.runtime_hint.is_empty() {
                    transport::default_runtime_hint(registry).to_string()
                } else {
                    pkg.runtime_hint.clone()
                };
                deployment.args.push(if pkg.version.is_empty() {
                    pkg.identifier.clone()
                } else {
                    format!("{}@{}", pkg.identifier, pkg.version)
                });
            }
        }

        for arg in &pkg.package_arguments {
            deployment.args.push(arg.value.clone());
        }
        deployment.args.extend(parts.args);

        if transport_kind == TRANSPORT_STDIO {
            return Ok(McpWorkload {
                name: internal.to_string(),
                kind: McpServerKind::Local,
                transport: TransportType::Stdio,
                deployment: Some(deployment),
                http: None,
                remote: None,
                owner: row.server_name.clone(),
            });
        }

        let endpoint = parse_endpoint(&transport_url)?;
        deployment.port = endpoint.port;
        Ok(McpWorkload {
            name: internal.to_string(),
            kind: McpServerKind::Local,
            transport: TransportType::Http,
            deployment: Some(deployment),
            http: Some(HttpTransport {
                target_port: endpoint.port,
                path: endpoint.path,
            }),
            remote: None,
            owner: row.server_name.clone(),
        })
    }

    async fn build_agent(
        &self,
        row: &Deployment,
        mcp_servers: &[McpWorkload],
    ) -> Result<Option<AgentWorkload>> {
        let document = self.manifest_document(ManifestKind::Agent, row).await?;
        let agent: AgentDetail = serde_json::from_value(document)
            .map_err(|err| RegistryError::Internal(format!("corrupt agent document: {err}")))?;

        let Some(spec) = &agent.deployment else {
            return Err(RegistryError::validation(
                "deployment",
                format!("agent {} has no deployment block", agent.name),
            ));
        };

        let parts = partition_config(&row.config);
        let mut env = spec.env.clone();
        env.extend(parts.env);

        let mut resolved = Vec::new();
        for reference in &agent.mcp_servers {
            let internal = sanitize_dns_label(reference);
            let Some(workload) = mcp_servers.iter().find(|w| w.name == internal) else {
                return Err(RegistryError::validation(
                    "mcpServers",
                    format!("references MCP server {reference} that is not deployed"),
                ));
            };
            resolved.push(resolve_ref(workload));
        }

        Ok(Some(AgentWorkload {
            name: sanitize_dns_label(&agent.name),
            version: row.version.clone(),
            deployment: WorkloadDeployment {
                image: spec.image.clone(),
                port: 0,
                cmd: spec.cmd.clone(),
                args: spec.args.clone(),
                env,
            },
            resolved_mcp_servers: resolved,
            owner: row.server_name.clone(),
        }))
    }
}

fn resolve_ref(workload: &McpWorkload) -> ResolvedMcpRef {
    match (workload.kind, &workload.remote, &workload.http) {
        (McpServerKind::Remote, Some(remote), _) => ResolvedMcpRef {
            name: workload.name.clone(),
            kind: MCP_REF_REMOTE.to_string(),
            url: remote.url(),
            headers: remote.headers.clone(),
        },
        (McpServerKind::Local, _, Some(http)) => ResolvedMcpRef {
            name: workload.name.clone(),
            kind: MCP_REF_REMOTE.to_string(),
            url: format!("http://{}:{}{}", workload.name, http.target_port, http.path),
            headers: BTreeMap::new(),
        },
        _ => ResolvedMcpRef {
            name: workload.name.clone(),
            kind: MCP_REF_COMMAND.to_string(),
            url: String::new(),
            headers: BTreeMap::new(),
        },
    }
}

fn package_supported(target: RuntimeTarget, registry_type: &str) -> bool {
    match target {
        RuntimeTarget::Local => matches!(registry_type, "oci" | "npm" | "pypi"),
        RuntimeTarget::Kubernetes => registry_type == "oci",
    }
}

fn parse_endpoint(raw: &str) -> Result<RemoteEndpoint> {
    let parsed = url::Url::parse(raw)
        .map_err(|err| RegistryError::validation("url", format!("invalid endpoint {raw}: {err}")))?;
    let scheme = HttpScheme::from_str(parsed.scheme())
        .map_err(|reason| RegistryError::validation("url", reason))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| RegistryError::validation("url", format!("endpoint {raw} has no host")))?
        .to_string();
    let port = parsed.port().unwrap_or_else(|| scheme.default_port());
    let path = match parsed.path() {
        "/" => String::new(),
        path => path.to_string(),
    };
    Ok(RemoteEndpoint {
        host,
        port,
        path,
        scheme,
        headers: BTreeMap::new(),
    })
}
