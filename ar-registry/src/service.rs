use crate::deployment::{DeploymentStatus, DeploymentStore};
use crate::model::{
    AgentDetail, ManifestKind, ManifestStatus, ServerDetail, SkillDetail, WrappedManifest,
};
use crate::store::{ListFilter, ManifestRecord, ManifestStore};
use crate::validators::{self, UpstreamProbe};
use ar_common::clock::Clock;
use ar_common::{RegistryError, Result};
use semver::Version;
use std::sync::Arc;

/// Catalog of published manifests: validation, versioning, the latest
/// pointer, and the delete guard against active deployments.
pub struct RegistryService {
    manifests: Arc<dyn ManifestStore>,
    deployments: Arc<dyn DeploymentStore>,
    probe: Arc<dyn UpstreamProbe>,
    #[allow(dead_code)]
    clock: Arc<dyn Clock>,
}

impl RegistryService {
    pub fn new(
        manifests: Arc<dyn ManifestStore>,
        deployments: Arc<dyn DeploymentStore>,
        probe: Arc<dyn UpstreamProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manifests,
            deployments,
            probe,
            clock,
        }
    }

    pub async fn publish_server(&self, mut server: ServerDetail) -> Result<WrappedManifest> {
        validators::validate_server(self.probe.as_ref(), &mut server).await?;
        let document = serde_json::to_value(&server)?;
        self.publish(
            ManifestKind::Server,
            &server.name,
            &server.version,
            &server.title,
            &server.description,
            &server.website_url,
            document,
        )
        .await
    }

    pub async fn publish_agent(&self, agent: AgentDetail) -> Result<WrappedManifest> {
        let document = serde_json::to_value(&agent)?;
        self.publish(
            ManifestKind::Agent,
            &agent.name,
            &agent.version,
            &agent.title,
            &agent.description,
            &agent.website_url,
            document,
        )
        .await
    }

    pub async fn publish_skill(&self, skill: SkillDetail) -> Result<WrappedManifest> {
        let document = serde_json::to_value(&skill)?;
        self.publish(
            ManifestKind::Skill,
            &skill.name,
            &skill.version,
            &skill.title,
            &skill.description,
            &skill.website_url,
            document,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish(
        &self,
        kind: ManifestKind,
        name: &str,
        version: &str,
        title: &str,
        description: &str,
        website_url: &str,
        document: serde_json::Value,
    ) -> Result<WrappedManifest> {
        if name.is_empty() {
            return Err(RegistryError::validation("name", "must not be empty"));
        }
        Version::parse(version).map_err(|err| {
            RegistryError::validation("version", format!("must be valid semver: {err}"))
        })?;

        let record = ManifestRecord {
            kind,
            name: name.to_string(),
            version: version.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            website_url: website_url.to_string(),
            document,
            status: ManifestStatus::Active,
            is_latest: false,
            published_at: Default::default(),
            updated_at: Default::default(),
        };

        match self.manifests.get(kind, name, version).await? {
            None => {
                self.manifests.insert(record).await?;
            }
            Some(existing) => {
                if existing.status == ManifestStatus::Deleted {
                    // Deleted versions are tombstones; their identifying
                    // tuple cannot be reused.
                    return Err(RegistryError::AlreadyExists(format!(
                        "{kind} {name}@{version} was deleted"
                    )));
                }
                // Re-publish of the same identifying tuple merges the
                // non-identifying fields and keeps the original status.
                let mut merged = record;
                merged.status = existing.status;
                self.manifests.update(merged).await?;
            }
        }

        self.recompute_latest(kind, name).await?;

        self.manifests
            .get(kind, name, version)
            .await?
            .map(|record| record.wrapped())
            .ok_or_else(|| RegistryError::Internal(format!("{name}@{version} vanished after publish")))
    }

    pub async fn get(
        &self,
        kind: ManifestKind,
        name: &str,
        version: &str,
        include_hidden: bool,
    ) -> Result<Option<WrappedManifest>> {
        let record = self.manifests.get(kind, name, version).await?;
        Ok(record
            .filter(|r| include_hidden || r.status != ManifestStatus::Deleted)
            .map(|r| r.wrapped()))
    }

    /// All versions of a name, semver-descending with the latest active
    /// version first.
    pub async fn get_versions(&self, kind: ManifestKind, name: &str) -> Result<Vec<WrappedManifest>> {
        let mut records = self.manifests.versions(kind, name).await?;
        records.sort_by(|a, b| semver_of(&b.version).cmp(&semver_of(&a.version)));
        if let Some(pos) = records.iter().position(|r| r.is_latest)
            && pos != 0
        {
            let latest = records.remove(pos);
            records.insert(0, latest);
        }
        Ok(records.into_iter().map(|r| r.wrapped()).collect())
    }

    pub async fn list(&self, kind: ManifestKind, filter: &ListFilter) -> Result<Vec<WrappedManifest>> {
        let records = self.manifests.list(kind, filter).await?;
        Ok(records.into_iter().map(|r| r.wrapped()).collect())
    }

    /// Soft delete. Rejected while an active deployment references the
    /// version: deployments pin their manifest.
    pub async fn delete(&self, kind: ManifestKind, name: &str, version: &str) -> Result<()> {
        self.manifests
            .get(kind, name, version)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("{kind} {name}@{version}")))?;

        if kind == ManifestKind::Server {
            let referenced = self.deployments.get_all().await?.into_iter().any(|dep| {
                dep.server_name == name
                    && dep.version == version
                    && dep.status == DeploymentStatus::Active
            });
            if referenced {
                return Err(RegistryError::Referenced(format!("{name}@{version}")));
            }
        }

        self.manifests
            .set_status(kind, name, version, ManifestStatus::Deleted)
            .await?;
        self.recompute_latest(kind, name).await
    }

    pub async fn set_status(
        &self,
        kind: ManifestKind,
        name: &str,
        version: &str,
        status: ManifestStatus,
    ) -> Result<()> {
        self.manifests.set_status(kind, name, version, status).await?;
        self.recompute_latest(kind, name).await
    }

    /// A deployment may only reference an active server version.
    pub async fn ensure_deployable(&self, name: &str, version: &str) -> Result<()> {
        let record = self
            .manifests
            .get(ManifestKind::Server, name, version)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("server {name}@{version}")))?;
        if record.status != ManifestStatus::Active {
            return Err(RegistryError::validation(
                "version",
                format!("server {name}@{version} is {}", record.status),
            ));
        }
        Ok(())
    }

    /// The latest pointer marks the semver-highest version whose status
    /// is active, or nothing when no version is active.
    async fn recompute_latest(&self, kind: ManifestKind, name: &str) -> Result<()> {
        let records = self.manifests.versions(kind, name).await?;
        let latest = records
            .iter()
            .filter(|r| r.status == ManifestStatus::Active)
            .filter_map(|r| Version::parse(&r.version).ok().map(|v| (v, &r.version)))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, version)| version.clone());
        self.manifests
            .mark_latest(kind, name, latest.as_deref())
            .await
    }
}

fn semver_of(version: &str) -> Version {
    Version::parse(version).unwrap_or_else(|_| Version::new(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{
        Deployment, DeploymentStatus, MemoryDeploymentStore, ResourceType, RuntimeTarget,
    };
    use crate::model::{Header, Remote};
    use crate::store::MemoryManifestStore;
    use crate::validators::tests::FakeProbe;
    use ar_common::clock::system_clock;
    use std::collections::BTreeMap;

    fn service() -> (RegistryService, Arc<MemoryDeploymentStore>) {
        let clock = system_clock();
        let deployments = Arc::new(MemoryDeploymentStore::new(clock.clone()));
        let service = RegistryService::new(
            Arc::new(MemoryManifestStore::new(clock.clone())),
            deployments.clone(),
            Arc::new(FakeProbe::with_annotations(&[])),
            clock,
        );
        (service, deployments)
    }

    fn remote_server(name: &str, version: &str) -> ServerDetail {
        ServerDetail {
            name: name.to_string(),
            title: "Weather".to_string(),
            description: "Weather lookups".to_string(),
            version: version.to_string(),
            website_url: "https://example.io".to_string(),
            remotes: vec![Remote {
                kind: "streamable-http".to_string(),
                url: "https://mcp.example.io/mcp".to_string(),
                headers: vec![Header {
                    name: "X-Tok".to_string(),
                    value: "z".to_string(),
                }],
            }],
            ..Default::default()
        }
    }

    async fn latest_versions(service: &RegistryService, name: &str) -> Vec<(String, bool)> {
        service
            .get_versions(ManifestKind::Server, name)
            .await
            .unwrap()
            .into_iter()
            .map(|w| {
                (
                    w.document["version"].as_str().unwrap().to_string(),
                    w.meta.official.is_latest,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_publish_get_list_round_trip() {
        let (service, _) = service();
        let published = service
            .publish_server(remote_server("io.example/weather", "1.0.0"))
            .await
            .unwrap();
        assert!(published.meta.official.is_latest);

        let fetched = service
            .get(ManifestKind::Server, "io.example/weather", "1.0.0", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.document, published.document);
        assert_eq!(fetched.document["remotes"][0]["headers"][0]["name"], "X-Tok");

        let listed = service
            .list(ManifestKind::Server, &ListFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].document, published.document);
    }

    #[tokio::test]
    async fn test_latest_pointer_follows_highest_active_semver() {
        let (service, _) = service();
        let name = "io.example/weather";

        for version in ["1.0.0", "2.0.0", "1.5.0"] {
            service
                .publish_server(remote_server(name, version))
                .await
                .unwrap();

            let versions = latest_versions(&service, name).await;
            let latest: Vec<&String> =
                versions.iter().filter(|(_, l)| *l).map(|(v, _)| v).collect();
            assert_eq!(latest.len(), 1, "exactly one latest after {version}");
        }

        let versions = latest_versions(&service, name).await;
        assert_eq!(versions[0], ("2.0.0".to_string(), true));

        // Deleting the highest active version moves the pointer down.
        service.delete(ManifestKind::Server, name, "2.0.0").await.unwrap();
        let versions = latest_versions(&service, name).await;
        assert_eq!(versions[0], ("1.5.0".to_string(), true));
        assert_eq!(versions.iter().filter(|(_, l)| *l).count(), 1);
    }

    #[tokio::test]
    async fn test_deprecated_version_is_never_latest() {
        let (service, _) = service();
        let name = "io.example/weather";
        service.publish_server(remote_server(name, "1.0.0")).await.unwrap();
        service.publish_server(remote_server(name, "2.0.0")).await.unwrap();

        service
            .set_status(ManifestKind::Server, name, "2.0.0", ManifestStatus::Deprecated)
            .await
            .unwrap();

        let versions = latest_versions(&service, name).await;
        assert_eq!(versions[0], ("1.0.0".to_string(), true));
    }

    #[tokio::test]
    async fn test_republish_merges_fields() {
        let (service, _) = service();
        let first = service
            .publish_server(remote_server("io.example/weather", "1.0.0"))
            .await
            .unwrap();

        let mut updated = remote_server("io.example/weather", "1.0.0");
        updated.description = "Weather and forecasts".to_string();
        let second = service.publish_server(updated).await.unwrap();

        assert_eq!(second.document["description"], "Weather and forecasts");
        assert_eq!(
            second.meta.official.published_at,
            first.meta.official.published_at
        );
    }

    #[tokio::test]
    async fn test_republish_of_deleted_version_conflicts() {
        let (service, _) = service();
        let name = "io.example/weather";
        service.publish_server(remote_server(name, "1.0.0")).await.unwrap();
        service.delete(ManifestKind::Server, name, "1.0.0").await.unwrap();

        let err = service
            .publish_server(remote_server(name, "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_invalid_semver_rejected() {
        let (service, _) = service();
        let err = service
            .publish_server(remote_server("io.example/weather", "one.zero"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("semver"));
    }

    #[tokio::test]
    async fn test_deleted_hidden_unless_requested() {
        let (service, _) = service();
        let name = "io.example/weather";
        service.publish_server(remote_server(name, "1.0.0")).await.unwrap();
        service.delete(ManifestKind::Server, name, "1.0.0").await.unwrap();

        assert!(
            service
                .get(ManifestKind::Server, name, "1.0.0", false)
                .await
                .unwrap()
                .is_none()
        );
        let hidden = service
            .get(ManifestKind::Server, name, "1.0.0", true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hidden.meta.official.status, ManifestStatus::Deleted);

        // History is preserved, list just hides it.
        let listed = service
            .list(ManifestKind::Server, &ListFilter::default())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_delete_rejected_while_deployment_references_version() {
        let (service, deployments) = service();
        let name = "io.example/weather";
        service.publish_server(remote_server(name, "1.0.0")).await.unwrap();

        deployments
            .upsert(Deployment {
                server_name: name.to_string(),
                version: "1.0.0".to_string(),
                resource_type: ResourceType::Mcp,
                config: BTreeMap::new(),
                prefer_remote: true,
                runtime: RuntimeTarget::Local,
                namespace: String::new(),
                status: DeploymentStatus::Active,
                status_reason: None,
                deployed_at: Default::default(),
                updated_at: Default::default(),
            })
            .await
            .unwrap();

        let err = service
            .delete(ManifestKind::Server, name, "1.0.0")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Referenced(_)), "got {err:?}");

        deployments.delete(name).await.unwrap();
        service.delete(ManifestKind::Server, name, "1.0.0").await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_deployable() {
        let (service, _) = service();
        let name = "io.example/weather";
        service.publish_server(remote_server(name, "1.0.0")).await.unwrap();

        service.ensure_deployable(name, "1.0.0").await.unwrap();
        assert!(service.ensure_deployable(name, "9.9.9").await.is_err());

        service
            .set_status(ManifestKind::Server, name, "1.0.0", ManifestStatus::Deprecated)
            .await
            .unwrap();
        let err = service.ensure_deployable(name, "1.0.0").await.unwrap_err();
        assert!(err.to_string().contains("deprecated"));
    }

    #[tokio::test]
    async fn test_agent_and_skill_filters() {
        let (service, _) = service();

        service
            .publish_agent(AgentDetail {
                name: "io.example/coder".to_string(),
                version: "1.0.0".to_string(),
                specialty: "coding".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        service
            .publish_agent(AgentDetail {
                name: "io.example/researcher".to_string(),
                version: "1.0.0".to_string(),
                specialty: "research".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        service
            .publish_skill(SkillDetail {
                name: "io.example/summarize".to_string(),
                version: "0.1.0".to_string(),
                category: "data-processing".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let coders = service
            .list(
                ManifestKind::Agent,
                &ListFilter {
                    specialty: Some("coding".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(coders.len(), 1);
        assert_eq!(coders[0].document["name"], "io.example/coder");

        let skills = service
            .list(
                ManifestKind::Skill,
                &ListFilter {
                    category: Some("data-processing".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(skills.len(), 1);
    }
}
