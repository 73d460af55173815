use ar_common::types::HttpScheme;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized, fully-resolved set of agents and MCP servers the
/// reconciler should realize on one runtime target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentWorkload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpWorkload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentWorkload {
    /// DNS-1123-safe internal name.
    pub name: String,
    pub version: String,
    pub deployment: WorkloadDeployment,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_mcp_servers: Vec<ResolvedMcpRef>,
    /// Deployment-store row this workload came from; not part of the
    /// translated artifact body.
    #[serde(skip)]
    pub owner: String,
}

/// Name-keyed reference an agent holds into the desired MCP server set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMcpRef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

pub const MCP_REF_COMMAND: &str = "command";
pub const MCP_REF_REMOTE: &str = "remote";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpServerKind {
    Local,
    Remote,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Stdio,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpWorkload {
    /// DNS-1123-safe internal name.
    pub name: String,
    pub kind: McpServerKind,
    pub transport: TransportType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<WorkloadDeployment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpTransport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteEndpoint>,
    #[serde(skip)]
    pub owner: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDeployment {
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
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpTransport {
    pub target_port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub scheme: HttpScheme,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl RemoteEndpoint {
    /// Rebuilds the endpoint URL, omitting the scheme-default port.
    pub fn url(&self) -> String {
        let authority = if self.port == 0 || self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        };
        format!("{}://{}{}", self.scheme, authority, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_endpoint_url() {
        let cases = vec![
            (("example.com", 8080, "/mcp", HttpScheme::Http), "http://example.com:8080/mcp"),
            (("example.com", 80, "/mcp", HttpScheme::Http), "http://example.com/mcp"),
            (("mcp.example.io", 443, "/mcp", HttpScheme::Https), "https://mcp.example.io/mcp"),
            (("svc", 3000, "", HttpScheme::Http), "http://svc:3000"),
        ];

        for ((host, port, path, scheme), want) in cases {
            let remote = RemoteEndpoint {
                host: host.to_string(),
                port,
                path: path.to_string(),
                scheme,
                headers: BTreeMap::new(),
            };
            assert_eq!(remote.url(), want);
        }
    }
}
