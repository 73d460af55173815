use crate::DBClient;
use crate::model::DeploymentRow;
use ar_common::{RegistryError, Result};
use ar_registry::deployment::{
    Deployment, DeploymentEvent, DeploymentOp, DeploymentStatus, DeploymentStore,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct PostgresDeploymentStore {
    client: Arc<DBClient>,
    events: broadcast::Sender<DeploymentEvent>,
}

impl PostgresDeploymentStore {
    pub fn new(client: Arc<DBClient>) -> Self {
        let (events, _) = broadcast::channel(100);
        PostgresDeploymentStore { client, events }
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

fn db_error(err: sqlx::Error) -> RegistryError {
    RegistryError::Internal(format!("database error: {err}"))
}

#[async_trait::async_trait]
impl DeploymentStore for PostgresDeploymentStore {
    async fn upsert(&self, deployment: Deployment) -> Result<Deployment> {
        if deployment.server_name.is_empty() {
            return Err(RegistryError::validation("serverName", "must not be empty"));
        }
        if deployment.version.is_empty() {
            return Err(RegistryError::validation("version", "must not be empty"));
        }

        let config = serde_json::to_value(&deployment.config)?;
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
        INSERT INTO tb_deployments
            (server_name, version, resource_type, config, prefer_remote,
             runtime, namespace, status, status_reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (server_name) DO UPDATE SET
            version = EXCLUDED.version,
            resource_type = EXCLUDED.resource_type,
            config = EXCLUDED.config,
            prefer_remote = EXCLUDED.prefer_remote,
            runtime = EXCLUDED.runtime,
            namespace = EXCLUDED.namespace,
            status = EXCLUDED.status,
            status_reason = EXCLUDED.status_reason,
            updated_at = now()
        RETURNING *
        "#,
        )
        .bind(&deployment.server_name)
        .bind(&deployment.version)
        .bind(deployment.resource_type.to_string())
        .bind(&config)
        .bind(deployment.prefer_remote)
        .bind(deployment.runtime.to_string())
        .bind(&deployment.namespace)
        .bind(deployment.status.to_string())
        .bind(&deployment.status_reason)
        .fetch_one(&self.client.pool)
        .await
        .map_err(db_error)?;

        let stored = row.into_deployment()?;
        self.emit(&stored.server_name, DeploymentOp::Upsert);
        Ok(stored)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM tb_deployments WHERE server_name = $1")
            .bind(name)
            .execute(&self.client.pool)
            .await
            .map_err(db_error)?;

        let removed = res.rows_affected() > 0;
        if removed {
            self.emit(name, DeploymentOp::Delete);
        }
        Ok(removed)
    }

    async fn get(&self, name: &str) -> Result<Option<Deployment>> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            "SELECT * FROM tb_deployments WHERE server_name = $1",
        )
        .bind(name)
        .fetch_optional(&self.client.pool)
        .await
        .map_err(db_error)?;

        row.map(DeploymentRow::into_deployment).transpose()
    }

    async fn get_all(&self) -> Result<Vec<Deployment>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(
            "SELECT * FROM tb_deployments ORDER BY server_name",
        )
        .fetch_all(&self.client.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(DeploymentRow::into_deployment).collect()
    }

    async fn set_status(
        &self,
        name: &str,
        status: DeploymentStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let res = sqlx::query(
            r#"
        UPDATE tb_deployments SET status = $2, status_reason = $3, updated_at = now()
        WHERE server_name = $1
        "#,
        )
        .bind(name)
        .bind(status.to_string())
        .bind(&reason)
        .execute(&self.client.pool)
        .await
        .map_err(db_error)?;

        if res.rows_affected() == 0 {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.events.subscribe()
    }
}
