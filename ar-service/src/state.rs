use ar_common::RegistryError;
use ar_registry::RegistryService;
use ar_registry::auth::Authorizer;
use ar_registry::deployment::DeploymentStore;
use http::StatusCode;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RegistryService>,
    pub deployments: Arc<dyn DeploymentStore>,
    pub authorizer: Arc<dyn Authorizer>,
    pub version: VersionInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    pub git_commit: String,
    pub build_time: String,
}

impl VersionInfo {
    pub fn from_build() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
            build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
        }
    }
}

/// Maps a typed error to the HTTP rejection shape handlers return.
pub fn reject(err: RegistryError) -> (StatusCode, String) {
    tracing::error!("Request failed: {}", err);
    (err.status_code(), err.public_message())
}
