use super::artifact::{Artifact, ArtifactKey};
use super::driver::RuntimeDriver;
use crate::translate::kagent::{KAGENT_API_VERSION, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use ar_common::{RegistryError, Result};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const FIELD_MANAGER: &str = "agentregistry";
const HASH_ANNOTATION: &str = "agentregistry.io/config-hash";

/// Kinds this control plane owns, with their API path fragments.
const KINDS: [(&str, &str, &str); 4] = [
    ("Agent", "apis/kagent.dev/v1alpha1", "agents"),
    ("MCPServer", "apis/kagent.dev/v1alpha1", "mcpservers"),
    ("RemoteMCPServer", "apis/kagent.dev/v1alpha1", "remotemcpservers"),
    ("ConfigMap", "api/v1", "configmaps"),
];

/// Applies custom resources through the Kubernetes REST API using
/// server-side apply; our resources are found back via the managed-by
/// label selector.
pub struct KubernetesDriver {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl KubernetesDriver {
    pub fn new(base_url: String, token: Option<String>, insecure: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|err| RegistryError::Internal(err.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    fn paths_for(&self, kind: &str) -> Result<(&'static str, &'static str)> {
        KINDS
            .iter()
            .find(|(k, _, _)| *k == kind)
            .map(|(_, prefix, plural)| (*prefix, *plural))
            .ok_or_else(|| RegistryError::Internal(format!("unknown artifact kind: {kind}")))
    }

    fn resource_url(&self, key: &ArtifactKey) -> Result<String> {
        let (prefix, plural) = self.paths_for(&key.kind)?;
        Ok(format!(
            "{}/{prefix}/namespaces/{}/{plural}/{}",
            self.base_url, key.namespace, key.name
        ))
    }

    async fn list_kind(&self, kind: &str, out: &mut Vec<Artifact>) -> Result<()> {
        let (prefix, plural) = self.paths_for(kind)?;
        let url = format!(
            "{}/{prefix}/{plural}?labelSelector={MANAGED_BY_LABEL}%3D{MANAGED_BY_VALUE}",
            self.base_url
        );

        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|err| RegistryError::Runtime(format!("failed to list {kind}: {err}")))?;

        // The CRD may not be installed yet; treat that as an empty list.
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(RegistryError::Runtime(format!(
                "list {kind} responded with {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| RegistryError::Runtime(err.to_string()))?;
        let Some(items) = body.get("items").and_then(|v| v.as_array()) else {
            return Ok(());
        };

        for item in items {
            let metadata = &item["metadata"];
            let name = metadata["name"].as_str().unwrap_or_default().to_string();
            let namespace = metadata["namespace"].as_str().unwrap_or_default().to_string();
            let hash = metadata["annotations"][HASH_ANNOTATION]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let managed = metadata["labels"][MANAGED_BY_LABEL].as_str() == Some(MANAGED_BY_VALUE);

            out.push(Artifact {
                key: ArtifactKey::new(kind, &namespace, &name),
                body: item.clone(),
                hash,
                owners: vec![],
                managed,
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RuntimeDriver for KubernetesDriver {
    async fn list(&self) -> Result<Vec<Artifact>> {
        let mut out = Vec::new();
        for (kind, _, _) in KINDS {
            self.list_kind(kind, &mut out).await?;
        }
        Ok(out)
    }

    async fn apply(&self, artifact: &Artifact) -> Result<()> {
        let mut body = artifact.body.clone();
        if body.get("apiVersion").is_none() {
            body["apiVersion"] = serde_json::Value::String(KAGENT_API_VERSION.to_string());
        }
        body["metadata"]["annotations"][HASH_ANNOTATION] =
            serde_json::Value::String(artifact.hash.clone());

        let url = format!(
            "{}?fieldManager={FIELD_MANAGER}&force=true",
            self.resource_url(&artifact.key)?
        );

        let response = self
            .request(self.client.patch(&url))
            .header("Content-Type", "application/apply-patch+yaml")
            .body(serde_json::to_string(&body)?)
            .send()
            .await
            .map_err(|err| {
                RegistryError::Runtime(format!("failed to apply {}: {err}", artifact.key))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(RegistryError::Runtime(format!(
                "apply of {} responded with {status}: {detail}",
                artifact.key
            )));
        }
        Ok(())
    }

    async fn remove(&self, key: &ArtifactKey) -> Result<()> {
        let response = self
            .request(self.client.delete(self.resource_url(key)?))
            .send()
            .await
            .map_err(|err| RegistryError::Runtime(format!("failed to delete {key}: {err}")))?;

        // Already gone is success for a delete.
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(RegistryError::Runtime(format!(
                "delete of {key} responded with {}",
                response.status()
            )));
        }
        Ok(())
    }
}
