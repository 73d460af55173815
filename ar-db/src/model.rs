use ar_common::{RegistryError, Result};
use ar_registry::deployment::{Deployment, DeploymentStatus, ResourceType, RuntimeTarget};
use ar_registry::model::{ManifestKind, ManifestStatus};
use ar_registry::store::ManifestRecord;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct ManifestRow {
    pub id: Uuid,
    pub kind: String,
    pub name: String,
    pub version: String,
    pub title: String,
    pub description: String,
    pub website_url: String,
    pub data: serde_json::Value,
    pub status: String,
    pub is_latest: bool,
    pub published_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ManifestRow {
    pub fn into_record(self) -> Result<ManifestRecord> {
        Ok(ManifestRecord {
            kind: ManifestKind::from_str(&self.kind).map_err(RegistryError::Internal)?,
            name: self.name,
            version: self.version,
            title: self.title,
            description: self.description,
            website_url: self.website_url,
            document: self.data,
            status: ManifestStatus::from_str(&self.status).map_err(RegistryError::Internal)?,
            is_latest: self.is_latest,
            published_at: self.published_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct DeploymentRow {
    pub server_name: String,
    pub version: String,
    pub resource_type: String,
    pub config: serde_json::Value,
    pub prefer_remote: bool,
    pub runtime: String,
    pub namespace: String,
    pub status: String,
    pub status_reason: Option<String>,
    pub deployed_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DeploymentRow {
    pub fn into_deployment(self) -> Result<Deployment> {
        let config: BTreeMap<String, String> =
            serde_json::from_value(self.config).map_err(|err| {
                RegistryError::Internal(format!("corrupt deployment config blob: {err}"))
            })?;
        Ok(Deployment {
            server_name: self.server_name,
            version: self.version,
            resource_type: ResourceType::from_str(&self.resource_type)
                .map_err(RegistryError::Internal)?,
            config,
            prefer_remote: self.prefer_remote,
            runtime: RuntimeTarget::from_str(&self.runtime).map_err(RegistryError::Internal)?,
            namespace: self.namespace,
            status: DeploymentStatus::from_str(&self.status).map_err(RegistryError::Internal)?,
            status_reason: self.status_reason,
            deployed_at: self.deployed_at,
            updated_at: self.updated_at,
        })
    }
}
