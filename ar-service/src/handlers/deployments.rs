use crate::state::{AppState, reject};
use ar_common::RegistryError;
use ar_common::app::Response;
use ar_registry::deployment::{Deployment, DeploymentStatus, ResourceType, RuntimeTarget};
use ar_registry::model::{ManifestKind, ManifestStatus};
use axum::Json;
use axum::extract::{Path, State};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub server_name: String,
    pub version: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub prefer_remote: bool,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub server_name: String,
    pub version: String,
    pub runtime: RuntimeTarget,
}

/// Records deployment intent and returns; reconciliation happens in the
/// background and never blocks this call.
pub async fn create_deployment(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> Result<Json<Response>, (StatusCode, String)> {
    let resource_type = match &request.resource_type {
        None => ResourceType::default(),
        Some(raw) => ResourceType::from_str(raw)
            .map_err(|reason| reject(RegistryError::validation("resourceType", reason)))?,
    };
    let runtime = match &request.runtime {
        None => RuntimeTarget::default(),
        Some(raw) => RuntimeTarget::from_str(raw)
            .map_err(|reason| reject(RegistryError::validation("runtime", reason)))?,
    };

    let namespace = request.namespace.unwrap_or_default();
    if runtime == RuntimeTarget::Kubernetes && namespace.is_empty() {
        return Err(reject(RegistryError::validation(
            "namespace",
            "required when runtime is kubernetes",
        )));
    }

    // Deployments may only reference an active manifest version.
    match resource_type {
        ResourceType::Mcp => {
            state
                .registry
                .ensure_deployable(&request.server_name, &request.version)
                .await
                .map_err(reject)?;
        }
        ResourceType::Agent => {
            let manifest = state
                .registry
                .get(ManifestKind::Agent, &request.server_name, &request.version, true)
                .await
                .map_err(reject)?
                .ok_or_else(|| {
                    reject(RegistryError::NotFound(format!(
                        "agent {}@{}",
                        request.server_name, request.version
                    )))
                })?;
            if manifest.meta.official.status != ManifestStatus::Active {
                return Err(reject(RegistryError::validation(
                    "version",
                    format!(
                        "agent {}@{} is {}",
                        request.server_name, request.version, manifest.meta.official.status
                    ),
                )));
            }
        }
    }

    let deployment = state
        .deployments
        .upsert(Deployment {
            server_name: request.server_name,
            version: request.version,
            resource_type,
            config: request.config,
            prefer_remote: request.prefer_remote,
            runtime,
            namespace,
            status: DeploymentStatus::Active,
            status_reason: None,
            deployed_at: Default::default(),
            updated_at: Default::default(),
        })
        .await
        .map_err(reject)?;

    let data = serde_json::to_value(DeployResponse {
        server_name: deployment.server_name,
        version: deployment.version,
        runtime: deployment.runtime,
    })
    .map_err(|err| {
        tracing::error!("Failed to encode deployment: {}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    })?;
    Ok(Json(Response::new(Some(data))))
}

/// Status endpoint: rows with their reconciliation state.
pub async fn list_deployments(
    State(state): State<AppState>,
) -> Result<Json<Response>, (StatusCode, String)> {
    let rows = state.deployments.get_all().await.map_err(reject)?;
    let data = serde_json::to_value(rows).map_err(|err| {
        tracing::error!("Failed to encode deployments: {}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    })?;
    Ok(Json(Response::new(Some(data))))
}

pub async fn delete_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Response>, (StatusCode, String)> {
    let removed = state.deployments.delete(&name).await.map_err(reject)?;
    if !removed {
        return Err(reject(RegistryError::NotFound(name)));
    }
    Ok(Json(Response::new(None)))
}
