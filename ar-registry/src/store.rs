use crate::model::{ManifestKind, ManifestStatus, Meta, OfficialMeta, WrappedManifest};
use ar_common::clock::Clock;
use ar_common::{RegistryError, Result};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage-level view of one published manifest version.
#[derive(Debug, Clone)]
pub struct ManifestRecord {
    pub kind: ManifestKind,
    pub name: String,
    pub version: String,
    pub title: String,
    pub description: String,
    pub website_url: String,
    /// Full document blob; the typed fields above are authoritative at the
    /// API surface, this is a passthrough copy.
    pub document: serde_json::Value,
    pub status: ManifestStatus,
    pub is_latest: bool,
    pub published_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ManifestRecord {
    pub fn wrapped(&self) -> WrappedManifest {
        WrappedManifest {
            document: self.document.clone(),
            meta: Meta {
                official: OfficialMeta {
                    published_at: self.published_at,
                    updated_at: self.updated_at,
                    status: self.status,
                    is_latest: self.is_latest,
                },
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub name: Option<String>,
    pub version: Option<String>,
    pub include_hidden: bool,
    /// Skills only.
    pub category: Option<String>,
    /// Agents only.
    pub specialty: Option<String>,
}

impl ListFilter {
    pub fn matches(&self, record: &ManifestRecord) -> bool {
        if !self.include_hidden && record.status == ManifestStatus::Deleted {
            return false;
        }
        if let Some(name) = &self.name
            && name != &record.name
        {
            return false;
        }
        if let Some(version) = &self.version
            && version != &record.version
        {
            return false;
        }
        if let Some(category) = &self.category
            && record.document.get("category").and_then(|v| v.as_str()) != Some(category.as_str())
        {
            return false;
        }
        if let Some(specialty) = &self.specialty
            && record.document.get("specialty").and_then(|v| v.as_str()) != Some(specialty.as_str())
        {
            return false;
        }
        true
    }
}

#[async_trait::async_trait]
pub trait ManifestStore: Send + Sync {
    /// Inserts a new `(kind, name, version)`. Errors with `AlreadyExists`
    /// when the tuple is taken.
    async fn insert(&self, record: ManifestRecord) -> Result<ManifestRecord>;

    /// Replaces an existing record, keyed by `(kind, name, version)`.
    async fn update(&self, record: ManifestRecord) -> Result<ManifestRecord>;

    async fn get(
        &self,
        kind: ManifestKind,
        name: &str,
        version: &str,
    ) -> Result<Option<ManifestRecord>>;

    /// All stored versions for a name, in no particular order.
    async fn versions(&self, kind: ManifestKind, name: &str) -> Result<Vec<ManifestRecord>>;

    async fn list(&self, kind: ManifestKind, filter: &ListFilter) -> Result<Vec<ManifestRecord>>;

    async fn set_status(
        &self,
        kind: ManifestKind,
        name: &str,
        version: &str,
        status: ManifestStatus,
    ) -> Result<()>;

    /// Sets `is_latest` on exactly the given version (or none) for a name.
    async fn mark_latest(
        &self,
        kind: ManifestKind,
        name: &str,
        latest: Option<&str>,
    ) -> Result<()>;
}

/// In-memory manifest store, used for the `memory` registry mode and by
/// tests. All writes for one `(kind, name)` happen under a single write
/// lock, so read-modify-write sequences are linearizable per key.
pub struct MemoryManifestStore {
    records: RwLock<HashMap<String, HashMap<String, ManifestRecord>>>,
    clock: Arc<dyn Clock>,
}

fn store_key(kind: ManifestKind, name: &str) -> String {
    format!("{kind}/{name}")
}

impl MemoryManifestStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait::async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn insert(&self, mut record: ManifestRecord) -> Result<ManifestRecord> {
        if record.name.is_empty() {
            return Err(RegistryError::validation("name", "must not be empty"));
        }
        if record.version.is_empty() {
            return Err(RegistryError::validation("version", "must not be empty"));
        }

        let mut records = self.records.write().await;
        let versions = records
            .entry(store_key(record.kind, &record.name))
            .or_default();
        if versions.contains_key(&record.version) {
            return Err(RegistryError::AlreadyExists(format!(
                "{}@{}",
                record.name, record.version
            )));
        }
        record.published_at = self.clock.now();
        record.updated_at = record.published_at;
        versions.insert(record.version.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, mut record: ManifestRecord) -> Result<ManifestRecord> {
        let mut records = self.records.write().await;
        let versions = records
            .get_mut(&store_key(record.kind, &record.name))
            .ok_or_else(|| RegistryError::NotFound(record.name.clone()))?;
        let existing = versions
            .get(&record.version)
            .ok_or_else(|| RegistryError::NotFound(format!("{}@{}", record.name, record.version)))?;
        record.published_at = existing.published_at;
        record.updated_at = self.clock.now();
        versions.insert(record.version.clone(), record.clone());
        Ok(record)
    }

    async fn get(
        &self,
        kind: ManifestKind,
        name: &str,
        version: &str,
    ) -> Result<Option<ManifestRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&store_key(kind, name))
            .and_then(|versions| versions.get(version))
            .cloned())
    }

    async fn versions(&self, kind: ManifestKind, name: &str) -> Result<Vec<ManifestRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&store_key(kind, name))
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list(&self, kind: ManifestKind, filter: &ListFilter) -> Result<Vec<ManifestRecord>> {
        let records = self.records.read().await;
        let prefix = format!("{kind}/");
        let mut out: Vec<ManifestRecord> = records
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .flat_map(|(_, versions)| versions.values())
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        Ok(out)
    }

    async fn set_status(
        &self,
        kind: ManifestKind,
        name: &str,
        version: &str,
        status: ManifestStatus,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&store_key(kind, name))
            .and_then(|versions| versions.get_mut(version))
            .ok_or_else(|| RegistryError::NotFound(format!("{name}@{version}")))?;
        record.status = status;
        record.updated_at = self.clock.now();
        Ok(())
    }

    async fn mark_latest(
        &self,
        kind: ManifestKind,
        name: &str,
        latest: Option<&str>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(versions) = records.get_mut(&store_key(kind, name)) {
            for record in versions.values_mut() {
                record.is_latest = latest == Some(record.version.as_str());
            }
        }
        Ok(())
    }
}
