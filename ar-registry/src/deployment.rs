use ar_common::clock::Clock;
use ar_common::{RegistryError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Mcp,
    Agent,
}

impl Default for ResourceType {
    fn default() -> Self {
        ResourceType::Mcp
    }
}

impl FromStr for ResourceType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mcp" => Ok(ResourceType::Mcp),
            "agent" => Ok(ResourceType::Agent),
            _ => Err(format!("Unknown resource type: {}", s)),
        }
    }
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            ResourceType::Mcp => "mcp",
            ResourceType::Agent => "agent",
        };
        write!(f, "{}", str)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeTarget {
    Local,
    Kubernetes,
}

impl Default for RuntimeTarget {
    fn default() -> Self {
        RuntimeTarget::Local
    }
}

impl FromStr for RuntimeTarget {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(RuntimeTarget::Local),
            "kubernetes" => Ok(RuntimeTarget::Kubernetes),
            _ => Err(format!("Unknown runtime target: {}", s)),
        }
    }
}

impl Display for RuntimeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            RuntimeTarget::Local => "local",
            RuntimeTarget::Kubernetes => "kubernetes",
        };
        write!(f, "{}", str)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Active,
    Stopped,
    Failed,
}

impl Default for DeploymentStatus {
    fn default() -> Self {
        DeploymentStatus::Active
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(DeploymentStatus::Active),
            "stopped" => Ok(DeploymentStatus::Stopped),
            "failed" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Unknown deployment status: {}", s)),
        }
    }
}

impl Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            DeploymentStatus::Active => "active",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Failed => "failed",
        };
        write!(f, "{}", str)
    }
}

/// User-declared desired state, one row per server name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub server_name: String,
    pub version: String,
    #[serde(default)]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub prefer_remote: bool,
    #[serde(default)]
    pub runtime: RuntimeTarget,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    pub deployed_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeploymentOp {
    Upsert,
    Delete,
}

/// Sent on the event channel after a write commits.
#[derive(Debug, Clone)]
pub struct DeploymentEvent {
    pub name: String,
    pub op: DeploymentOp,
}

#[async_trait::async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Last-writer-wins upsert on `server_name`. Emits an event after the
    /// write commits.
    async fn upsert(&self, deployment: Deployment) -> Result<Deployment>;

    /// Returns true when a row was removed. Emits an event after commit.
    async fn delete(&self, name: &str) -> Result<bool>;

    async fn get(&self, name: &str) -> Result<Option<Deployment>>;

    async fn get_all(&self) -> Result<Vec<Deployment>>;

    /// Reconciler status writeback. Deliberately does not emit an event:
    /// status flips must not retrigger reconciliation.
    async fn set_status(
        &self,
        name: &str,
        status: DeploymentStatus,
        reason: Option<String>,
    ) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent>;
}

/// In-memory deployment store. Writes to one row happen under the map
/// write lock, which makes them linearizable per `server_name`.
pub struct MemoryDeploymentStore {
    rows: RwLock<HashMap<String, Deployment>>,
    events: broadcast::Sender<DeploymentEvent>,
    clock: Arc<dyn Clock>,
}

impl MemoryDeploymentStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            rows: RwLock::new(HashMap::new()),
            events,
            clock,
        }
    }

    fn emit(&self, name: &str, op: DeploymentOp) {
        if let Err(err) = self.events.send(DeploymentEvent {
            name: name.to_string(),
            op,
        }) {
            tracing::debug!("No reconciler subscribed for deployment event: {}", err);
        }
    }
}

#[async_trait::async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn upsert(&self, mut deployment: Deployment) -> Result<Deployment> {
        if deployment.server_name.is_empty() {
            return Err(RegistryError::validation("serverName", "must not be empty"));
        }
        if deployment.version.is_empty() {
            return Err(RegistryError::validation("version", "must not be empty"));
        }

        {
            let mut rows = self.rows.write().await;
            let now = self.clock.now();
            deployment.updated_at = now;
            deployment.deployed_at = rows
                .get(&deployment.server_name)
                .map(|existing| existing.deployed_at)
                .unwrap_or(now);
            rows.insert(deployment.server_name.clone(), deployment.clone());
        }

        self.emit(&deployment.server_name, DeploymentOp::Upsert);
        Ok(deployment)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let removed = {
            let mut rows = self.rows.write().await;
            rows.remove(name).is_some()
        };
        if removed {
            self.emit(name, DeploymentOp::Delete);
        }
        Ok(removed)
    }

    async fn get(&self, name: &str) -> Result<Option<Deployment>> {
        let rows = self.rows.read().await;
        Ok(rows.get(name).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Deployment>> {
        let rows = self.rows.read().await;
        let mut out: Vec<Deployment> = rows.values().cloned().collect();
        out.sort_by(|a, b| a.server_name.cmp(&b.server_name));
        Ok(out)
    }

    async fn set_status(
        &self,
        name: &str,
        status: DeploymentStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        row.status = status;
        row.status_reason = reason;
        row.updated_at = self.clock.now();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ar_common::clock::system_clock;

    fn deployment(name: &str) -> Deployment {
        Deployment {
            server_name: name.to_string(),
            version: "1.0.0".to_string(),
            resource_type: ResourceType::Mcp,
            config: BTreeMap::new(),
            prefer_remote: false,
            runtime: RuntimeTarget::Local,
            namespace: String::new(),
            status: DeploymentStatus::Active,
            status_reason: None,
            deployed_at: Default::default(),
            updated_at: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_upsert_emits_event_after_commit() {
        let store = MemoryDeploymentStore::new(system_clock());
        let mut events = store.subscribe();

        store.upsert(deployment("io.example/weather")).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.name, "io.example/weather");
        assert_eq!(event.op, DeploymentOp::Upsert);
        // Row is visible by the time the event arrives.
        assert!(store.get("io.example/weather").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_preserves_deployed_at() {
        let store = MemoryDeploymentStore::new(system_clock());
        let first = store.upsert(deployment("io.example/weather")).await.unwrap();

        let mut second = deployment("io.example/weather");
        second.version = "2.0.0".to_string();
        let second = store.upsert(second).await.unwrap();

        assert_eq!(second.deployed_at, first.deployed_at);
        assert_eq!(second.version, "2.0.0");
    }

    #[tokio::test]
    async fn test_upsert_rejects_empty_fields() {
        let store = MemoryDeploymentStore::new(system_clock());
        let mut dep = deployment("");
        assert!(store.upsert(dep.clone()).await.is_err());
        dep.server_name = "x".to_string();
        dep.version = String::new();
        assert!(store.upsert(dep).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_row_is_silent() {
        let store = MemoryDeploymentStore::new(system_clock());
        assert!(!store.delete("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_status_does_not_emit() {
        let store = MemoryDeploymentStore::new(system_clock());
        store.upsert(deployment("a")).await.unwrap();
        let mut events = store.subscribe();

        store
            .set_status("a", DeploymentStatus::Failed, Some("compose up failed".into()))
            .await
            .unwrap();

        assert!(events.try_recv().is_err());
        let row = store.get("a").await.unwrap().unwrap();
        assert_eq!(row.status, DeploymentStatus::Failed);
        assert_eq!(row.status_reason.as_deref(), Some("compose up failed"));
    }
}
