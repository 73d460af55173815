use crate::DBClient;
use crate::model::ManifestRow;
use ar_common::{RegistryError, Result};
use ar_registry::model::{ManifestKind, ManifestStatus};
use ar_registry::store::{ListFilter, ManifestRecord, ManifestStore};
use std::sync::Arc;
use uuid::Uuid;

pub struct PostgresManifestStore {
    client: Arc<DBClient>,
}

impl PostgresManifestStore {
    pub fn new(client: Arc<DBClient>) -> Self {
        PostgresManifestStore { client }
    }
}

fn db_error(err: sqlx::Error) -> RegistryError {
    RegistryError::Internal(format!("database error: {err}"))
}

#[async_trait::async_trait]
impl ManifestStore for PostgresManifestStore {
    async fn insert(&self, record: ManifestRecord) -> Result<ManifestRecord> {
        if record.name.is_empty() {
            return Err(RegistryError::validation("name", "must not be empty"));
        }
        if record.version.is_empty() {
            return Err(RegistryError::validation("version", "must not be empty"));
        }

        let res = sqlx::query_as::<_, ManifestRow>(
            r#"
        INSERT INTO tb_manifests
            (id, kind, name, version, title, description, website_url, data, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (kind, name, version) DO NOTHING
        RETURNING *
        "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.kind.to_string())
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.website_url)
        .bind(&record.document)
        .bind(record.status.to_string())
        .fetch_optional(&self.client.pool)
        .await
        .map_err(db_error)?;

        match res {
            Some(row) => row.into_record(),
            None => Err(RegistryError::AlreadyExists(format!(
                "{}@{}",
                record.name, record.version
            ))),
        }
    }

    async fn update(&self, record: ManifestRecord) -> Result<ManifestRecord> {
        let res = sqlx::query_as::<_, ManifestRow>(
            r#"
        UPDATE tb_manifests
        SET title = $4, description = $5, website_url = $6, data = $7,
            status = $8, updated_at = now()
        WHERE kind = $1 AND name = $2 AND version = $3
        RETURNING *
        "#,
        )
        .bind(record.kind.to_string())
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.website_url)
        .bind(&record.document)
        .bind(record.status.to_string())
        .fetch_optional(&self.client.pool)
        .await
        .map_err(db_error)?;

        match res {
            Some(row) => row.into_record(),
            None => Err(RegistryError::NotFound(format!(
                "{}@{}",
                record.name, record.version
            ))),
        }
    }

    async fn get(
        &self,
        kind: ManifestKind,
        name: &str,
        version: &str,
    ) -> Result<Option<ManifestRecord>> {
        let row = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM tb_manifests WHERE kind = $1 AND name = $2 AND version = $3",
        )
        .bind(kind.to_string())
        .bind(name)
        .bind(version)
        .fetch_optional(&self.client.pool)
        .await
        .map_err(db_error)?;

        row.map(ManifestRow::into_record).transpose()
    }

    async fn versions(&self, kind: ManifestKind, name: &str) -> Result<Vec<ManifestRecord>> {
        let rows = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM tb_manifests WHERE kind = $1 AND name = $2",
        )
        .bind(kind.to_string())
        .bind(name)
        .fetch_all(&self.client.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(ManifestRow::into_record).collect()
    }

    async fn list(&self, kind: ManifestKind, filter: &ListFilter) -> Result<Vec<ManifestRecord>> {
        let rows = sqlx::query_as::<_, ManifestRow>(
            "SELECT * FROM tb_manifests WHERE kind = $1 ORDER BY name, version",
        )
        .bind(kind.to_string())
        .fetch_all(&self.client.pool)
        .await
        .map_err(db_error)?;

        let records: Result<Vec<ManifestRecord>> =
            rows.into_iter().map(ManifestRow::into_record).collect();
        Ok(records?
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect())
    }

    async fn set_status(
        &self,
        kind: ManifestKind,
        name: &str,
        version: &str,
        status: ManifestStatus,
    ) -> Result<()> {
        let res = sqlx::query(
            r#"
        UPDATE tb_manifests SET status = $4, updated_at = now()
        WHERE kind = $1 AND name = $2 AND version = $3
        "#,
        )
        .bind(kind.to_string())
        .bind(name)
        .bind(version)
        .bind(status.to_string())
        .execute(&self.client.pool)
        .await
        .map_err(db_error)?;

        if res.rows_affected() == 0 {
            return Err(RegistryError::NotFound(format!("{name}@{version}")));
        }
        Ok(())
    }

    async fn mark_latest(
        &self,
        kind: ManifestKind,
        name: &str,
        latest: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
        UPDATE tb_manifests SET is_latest = (version = $3)
        WHERE kind = $1 AND name = $2
        "#,
        )
        .bind(kind.to_string())
        .bind(name)
        .bind(latest.unwrap_or(""))
        .execute(&self.client.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
