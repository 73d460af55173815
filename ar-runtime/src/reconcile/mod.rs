pub mod artifact;
pub mod compose_driver;
pub mod driver;
pub mod kube_driver;

use crate::builder::DesiredStateBuilder;
use crate::reconcile::artifact::{Artifact, ArtifactKey, artifacts_from};
use crate::reconcile::driver::RuntimeDriver;
use crate::translate::Translate;
use ar_common::{RegistryError, Result};
use ar_registry::deployment::{DeploymentStatus, DeploymentStore, RuntimeTarget};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;

const TICK_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);
const APPLY_ATTEMPTS: u32 = 3;
const APPLY_BACKOFF: Duration = Duration::from_secs(1);

/// Control loop driving one runtime target toward the deployment store's
/// desired state. At most one tick runs at a time per target; events
/// arriving mid-tick coalesce into a single follow-up tick.
pub struct Reconciler {
    target: RuntimeTarget,
    builder: DesiredStateBuilder,
    translator: Arc<dyn Translate>,
    driver: Arc<dyn RuntimeDriver>,
    deployments: Arc<dyn DeploymentStore>,
    tick_interval: Duration,
    notify: Arc<Notify>,
}

impl Reconciler {
    pub fn new(
        target: RuntimeTarget,
        builder: DesiredStateBuilder,
        translator: Arc<dyn Translate>,
        driver: Arc<dyn RuntimeDriver>,
        deployments: Arc<dyn DeploymentStore>,
    ) -> Self {
        Self {
            target,
            builder,
            translator,
            driver,
            deployments,
            tick_interval: TICK_INTERVAL,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Requests an out-of-band tick.
    pub fn reconcile_now(&self) {
        self.notify.notify_one();
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let mut events = self.deployments.subscribe();
        let notify = self.notify.clone();
        let events_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = events_shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => notify.notify_one(),
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = self.notify.notified() => {}
                }

                tokio::select! {
                    _ = self.reconcile() => {}
                    _ = async {
                        shutdown.cancelled().await;
                        tokio::time::sleep(SHUTDOWN_GRACE).await;
                    } => {
                        tracing::warn!(
                            "Abandoning in-flight {} reconcile after shutdown grace period",
                            self.target
                        );
                        break;
                    }
                }
            }
            tracing::info!("Reconciler for {} stopped", self.target);
        })
    }

    /// One reconciliation pass: snapshot, translate, diff, apply.
    /// Errors are recorded on deployment rows, never returned upward.
    pub async fn reconcile(&self) {
        let desired_state = match self.builder.build(self.target).await {
            Ok(state) => state,
            Err(err) => {
                tracing::error!("Failed to derive desired state for {}: {}", self.target, err);
                return;
            }
        };

        let desired = match self
            .translator
            .translate(&desired_state)
            .and_then(|artifacts| artifacts_from(&artifacts, &desired_state))
        {
            Ok(artifacts) => artifacts,
            Err(err) => {
                tracing::error!("Failed to translate desired state for {}: {}", self.target, err);
                return;
            }
        };

        let actual = match self.driver.list().await {
            Ok(artifacts) => artifacts,
            Err(err) => {
                tracing::error!("Failed to list {} artifacts: {}", self.target, err);
                return;
            }
        };

        let desired_map: HashMap<ArtifactKey, &Artifact> =
            desired.iter().map(|a| (a.key.clone(), a)).collect();
        let actual_map: HashMap<ArtifactKey, &Artifact> =
            actual.iter().map(|a| (a.key.clone(), a)).collect();

        for artifact in &desired {
            let unchanged = actual_map
                .get(&artifact.key)
                .is_some_and(|current| current.hash == artifact.hash);
            if unchanged {
                continue;
            }

            match self.apply_with_retry(artifact).await {
                Ok(()) => self.restore_owners(artifact).await,
                Err(err) => self.fail_owners(artifact, &err).await,
            }
        }

        for artifact in &actual {
            if desired_map.contains_key(&artifact.key) || !artifact.managed {
                continue;
            }
            if let Err(err) = self.remove_with_retry(&artifact.key).await {
                tracing::error!("Failed to remove {}: {}", artifact.key, err);
            }
        }
    }

    async fn apply_with_retry(&self, artifact: &Artifact) -> Result<()> {
        let mut backoff = APPLY_BACKOFF;
        let mut last = None;
        for attempt in 1..=APPLY_ATTEMPTS {
            match self.driver.apply(artifact).await {
                Ok(()) => {
                    tracing::info!("Applied {} (attempt {})", artifact.key, attempt);
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        "Apply of {} failed (attempt {}/{}): {}",
                        artifact.key,
                        attempt,
                        APPLY_ATTEMPTS,
                        err
                    );
                    last = Some(err);
                    if attempt < APPLY_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| RegistryError::Runtime("apply failed".to_string())))
    }

    async fn remove_with_retry(&self, key: &ArtifactKey) -> Result<()> {
        let mut backoff = APPLY_BACKOFF;
        let mut last = None;
        for attempt in 1..=APPLY_ATTEMPTS {
            match self.driver.remove(key).await {
                Ok(()) => {
                    tracing::info!("Removed {} (attempt {})", key, attempt);
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        "Remove of {} failed (attempt {}/{}): {}",
                        key,
                        attempt,
                        APPLY_ATTEMPTS,
                        err
                    );
                    last = Some(err);
                    if attempt < APPLY_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| RegistryError::Runtime("remove failed".to_string())))
    }

    async fn fail_owners(&self, artifact: &Artifact, err: &RegistryError) {
        for owner in &artifact.owners {
            if let Err(status_err) = self
                .deployments
                .set_status(owner, DeploymentStatus::Failed, Some(err.to_string()))
                .await
            {
                tracing::error!("Failed to mark deployment {} failed: {}", owner, status_err);
            }
        }
    }

    async fn restore_owners(&self, artifact: &Artifact) {
        for owner in &artifact.owners {
            let current = match self.deployments.get(owner).await {
                Ok(Some(row)) => row,
                _ => continue,
            };
            if current.status != DeploymentStatus::Failed {
                continue;
            }
            if let Err(err) = self
                .deployments
                .set_status(owner, DeploymentStatus::Active, None)
                .await
            {
                tracing::error!("Failed to restore deployment {}: {}", owner, err);
            }
        }
    }
}
