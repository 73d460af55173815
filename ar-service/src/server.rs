use crate::config::{AppConfig, StoreConfig};
use crate::handlers;
use crate::state::{AppState, VersionInfo};
use ar_booter::app::application::Application;
use ar_common::clock::system_clock;
use ar_common::utils;
use ar_db::{DBClient, PostgresDeploymentStore, PostgresManifestStore};
use ar_registry::RegistryService;
use ar_registry::auth::StaticTokenAuthorizer;
use ar_registry::deployment::{DeploymentStore, MemoryDeploymentStore, RuntimeTarget};
use ar_registry::store::{ManifestStore, MemoryManifestStore};
use ar_registry::validators::probe::HttpUpstreamProbe;
use ar_runtime::builder::DesiredStateBuilder;
use ar_runtime::home::ArctlHome;
use ar_runtime::reconcile::Reconciler;
use ar_runtime::reconcile::compose_driver::DockerComposeDriver;
use ar_runtime::reconcile::kube_driver::KubernetesDriver;
use ar_runtime::translate::compose::AgentGatewayTranslator;
use ar_runtime::translate::kagent::KagentTranslator;
use axum::Router;
use axum::routing::{delete, get, post};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

pub struct MainServer {
    config: AppConfig,
}

impl MainServer {
    pub fn new() -> Self {
        Self {
            config: Default::default(),
        }
    }

    async fn build_stores(
        &self,
    ) -> Result<(Arc<dyn ManifestStore>, Arc<dyn DeploymentStore>), Box<dyn Error>> {
        let clock = system_clock();
        match &self.config.store {
            StoreConfig::Memory => {
                tracing::info!("Using in-memory stores");
                Ok((
                    Arc::new(MemoryManifestStore::new(clock.clone())),
                    Arc::new(MemoryDeploymentStore::new(clock)),
                ))
            }
            StoreConfig::Postgres {
                host,
                port,
                username,
                password,
                database,
                max_connection,
                migrations_path,
            } => {
                let client = DBClient::create(
                    host,
                    *port,
                    username,
                    password,
                    database,
                    *max_connection,
                )
                .await
                .map_err(|e| {
                    tracing::error!(
                        "Error creating database client, host: {host}, port: {port}, user: {username}, database: {database}"
                    );
                    e
                })?;
                let client = Arc::new(client);
                if let Some(path) = migrations_path {
                    client.migrate(PathBuf::from(path)).await?;
                }
                Ok((
                    Arc::new(PostgresManifestStore::new(client.clone())),
                    Arc::new(PostgresDeploymentStore::new(client)),
                ))
            }
        }
    }

    fn spawn_reconcilers(
        &self,
        manifests: Arc<dyn ManifestStore>,
        deployments: Arc<dyn DeploymentStore>,
        shutdown: &CancellationToken,
    ) -> Result<(), Box<dyn Error>> {
        if self.config.runtime.local {
            let home = ArctlHome::new()?;
            let driver = DockerComposeDriver::new(home, self.config.registry.gateway_port)?;
            let translator = AgentGatewayTranslator::new(
                driver.working_dir().clone(),
                self.config.registry.gateway_port,
            );
            let reconciler = Arc::new(Reconciler::new(
                RuntimeTarget::Local,
                DesiredStateBuilder::new(manifests.clone(), deployments.clone()),
                Arc::new(translator),
                Arc::new(driver),
                deployments.clone(),
            ));
            reconciler.spawn(shutdown.clone());
            tracing::info!("Local compose reconciler started");
        }

        if let Some(kube) = &self.config.runtime.kubernetes {
            let driver =
                KubernetesDriver::new(kube.api_server.clone(), kube.token.clone(), kube.insecure)?;
            let translator = KagentTranslator::with_namespace(kube.namespace.clone());
            let reconciler = Arc::new(Reconciler::new(
                RuntimeTarget::Kubernetes,
                DesiredStateBuilder::new(manifests, deployments.clone()),
                Arc::new(translator),
                Arc::new(driver),
                deployments,
            ));
            reconciler.spawn(shutdown.clone());
            tracing::info!("Kubernetes reconciler started for {}", kube.api_server);
        }

        Ok(())
    }

    fn start(&self, shutdown_signal: CancellationToken, rt: Runtime) -> Result<(), Box<dyn Error>> {
        let runtime = Arc::new(rt);
        let http_port = self.config.registry.http_port;

        runtime.clone().block_on(async move {
            let (manifests, deployments) = self.build_stores().await?;

            let registry = Arc::new(RegistryService::new(
                manifests.clone(),
                deployments.clone(),
                Arc::new(HttpUpstreamProbe::new()),
                system_clock(),
            ));

            self.spawn_reconcilers(manifests, deployments.clone(), &shutdown_signal)?;

            let state = AppState {
                registry,
                deployments,
                authorizer: Arc::new(StaticTokenAuthorizer::from_env()),
                version: VersionInfo::from_build(),
            };

            let app = Router::new()
                .route("/v0/health", get(handlers::health::health))
                .route("/v0/version", get(handlers::health::version))
                .route("/v0/publish", post(handlers::publish::publish_server))
                .route("/v0/agents/publish", post(handlers::publish::publish_agent))
                .route("/v0/skills/publish", post(handlers::publish::publish_skill))
                .route("/v0/servers", get(handlers::manifests::list_servers))
                .route("/v0/agents", get(handlers::manifests::list_agents))
                .route("/v0/skills", get(handlers::manifests::list_skills))
                .route(
                    "/v0/deployments",
                    get(handlers::deployments::list_deployments)
                        .post(handlers::deployments::create_deployment),
                )
                .route(
                    "/v0/deployments/{name}",
                    delete(handlers::deployments::delete_deployment),
                )
                .with_state(state);

            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{http_port}")).await?;

            let shutdown = || async move {
                shutdown_signal.cancelled().await;
                tracing::info!("Shutting down...");
            };

            tracing::info!("starting HTTP server on port {}", http_port);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown())
                .await?;

            Ok(())
        })
    }
}

impl Application for MainServer {
    fn new() -> Self {
        Self::new()
    }

    fn prepare(&mut self, path: String) -> Result<(), Box<dyn Error>> {
        tracing::info!("Preparing agent registry with config: {}", path);

        let mut content = fs::read_to_string(path.clone()).map_err(|e| {
            tracing::error!("Failed to read config file {}: {}", path, e);
            e
        })?;

        content = utils::replace_env_variables(content);

        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            tracing::error!("Failed to parse TOML config: {}", e);
            e
        })?;

        tracing::debug!("The application config: \n{:?}", config);

        self.config = config;
        Ok(())
    }

    fn run(&mut self, shutdown: CancellationToken, rt: Runtime) -> Result<(), Box<dyn Error>> {
        self.start(shutdown, rt)?;
        Ok(())
    }
}
