use super::artifact::{Artifact, ArtifactKey, KIND_COMPOSE_PROJECT};
use super::driver::RuntimeDriver;
use crate::home::ArctlHome;
use crate::kubeconfig::prepare_kubeconfig;
use crate::translate::compose::{ComposeProject, GATEWAY_SERVICE_NAME, GatewayConfig};
use ar_common::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const COMPOSE_UP_TIMEOUT: Duration = Duration::from_secs(120);
const COMPOSE_CMD_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_RETRIES: usize = 3;
const PROBE_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Serialize, Deserialize)]
struct AppliedState {
    /// Artifact key string → last applied body hash.
    projects: BTreeMap<String, String>,
}

/// Drives a local docker compose project. The project YAML is piped to
/// `docker compose` over stdin; the last-applied hash is tracked in a
/// state file under the arctl home.
pub struct DockerComposeDriver {
    home: ArctlHome,
    working_dir: PathBuf,
    gateway_port: u16,
    docker_registry: String,
    version: String,
    client: reqwest::Client,
}

impl DockerComposeDriver {
    pub fn new(home: ArctlHome, gateway_port: u16) -> Result<Self> {
        let working_dir = home.new_runtime_dir("compose-")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|err| RegistryError::Internal(err.to_string()))?;
        Ok(Self {
            home,
            working_dir,
            gateway_port,
            docker_registry: std::env::var("DOCKER_REGISTRY").unwrap_or_default(),
            version: std::env::var("VERSION").unwrap_or_default(),
            client,
        })
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    fn state_path(&self) -> PathBuf {
        self.home.root().join("compose-state.json")
    }

    fn load_state(&self) -> AppliedState {
        std::fs::read_to_string(self.state_path())
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    fn save_state(&self, state: &AppliedState) -> Result<()> {
        let data = serde_json::to_string_pretty(state)?;
        self.home.write_file(&self.state_path(), &data)
    }

    async fn run_compose(
        &self,
        project: &str,
        args: &[&str],
        stdin: Option<String>,
        timeout: Duration,
    ) -> Result<String> {
        let mut cmd = tokio::process::Command::new("docker");
        cmd.arg("compose").arg("-p").arg(project);
        if stdin.is_some() {
            cmd.arg("-f").arg("-");
        }
        cmd.args(args)
            .env("DOCKER_REGISTRY", &self.docker_registry)
            .env("VERSION", &self.version)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| RegistryError::Runtime(format!("failed to spawn docker: {err}")))?;

        if let Some(input) = stdin {
            let mut handle = child.stdin.take().ok_or_else(|| {
                RegistryError::Runtime("failed to open docker compose stdin".to_string())
            })?;
            handle
                .write_all(input.as_bytes())
                .await
                .map_err(|err| RegistryError::Runtime(format!("failed to pipe compose file: {err}")))?;
            drop(handle);
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| RegistryError::Runtime(format!("docker compose {args:?} timed out")))?
            .map_err(|err| RegistryError::Runtime(format!("docker compose failed: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RegistryError::Runtime(format!(
                "docker compose {args:?} exited with {}: {stderr}",
                output.status
            )));
        }
        Ok(stdout)
    }

    fn render_project(&self, body: &serde_json::Value) -> Result<(ComposeProject, GatewayConfig)> {
        let project: ComposeProject = serde_json::from_value(
            body.get("project")
                .cloned()
                .ok_or_else(|| RegistryError::Internal("compose artifact missing project".into()))?,
        )?;
        let gateway: GatewayConfig = serde_json::from_value(
            body.get("gateway")
                .cloned()
                .ok_or_else(|| RegistryError::Internal("compose artifact missing gateway".into()))?,
        )?;
        Ok((project, gateway))
    }

    /// On macOS a bind-mounted kubeconfig pointing at localhost is
    /// replaced with a patched copy; the original is never touched.
    fn rewrite_kube_mounts(&self, project: &mut ComposeProject) -> Result<()> {
        if !cfg!(target_os = "macos") {
            return Ok(());
        }
        let Some(patched) = prepare_kubeconfig(&self.home)? else {
            return Ok(());
        };
        let patched = patched.to_string_lossy().into_owned();
        for service in project.services.values_mut() {
            for volume in &mut service.volumes {
                if volume.source.ends_with(".kube/config") {
                    volume.source = patched.clone();
                }
            }
        }
        Ok(())
    }

    /// Liveness: the gateway's version endpoint answers, or the compose
    /// project reports the gateway service up.
    pub async fn is_running(&self) -> bool {
        let url = format!("http://localhost:{}/v0/version", self.gateway_port);
        for attempt in 0..PROBE_RETRIES {
            if let Ok(response) = self.client.get(&url).send().await
                && response.status().is_success()
            {
                return true;
            }
            if attempt + 1 < PROBE_RETRIES {
                tokio::time::sleep(PROBE_BACKOFF).await;
            }
        }

        match self
            .run_compose("ai_registry", &["ps"], None, COMPOSE_CMD_TIMEOUT)
            .await
        {
            Ok(output) => output.contains(GATEWAY_SERVICE_NAME),
            Err(_) => false,
        }
    }

    async fn project_exists(&self, name: &str) -> bool {
        match self
            .run_compose(name, &["ls", "--format", "json"], None, COMPOSE_CMD_TIMEOUT)
            .await
        {
            Ok(output) => output.contains(&format!("\"{name}\"")),
            Err(err) => {
                tracing::warn!("Failed to list compose projects: {}", err);
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl RuntimeDriver for DockerComposeDriver {
    async fn list(&self) -> Result<Vec<Artifact>> {
        let state = self.load_state();
        let mut out = Vec::new();
        for (name, hash) in &state.projects {
            if !self.project_exists(name).await {
                continue;
            }
            out.push(Artifact {
                key: ArtifactKey::new(KIND_COMPOSE_PROJECT, "", name),
                body: serde_json::Value::Null,
                hash: hash.clone(),
                owners: vec![],
                managed: true,
            });
        }
        Ok(out)
    }

    async fn apply(&self, artifact: &Artifact) -> Result<()> {
        let (mut project, gateway) = self.render_project(&artifact.body)?;
        self.rewrite_kube_mounts(&mut project)?;

        // The gateway loads its routing table from the mounted config dir.
        let gateway_yaml = serde_yaml::to_string(&gateway)
            .map_err(|err| RegistryError::Internal(format!("failed to render gateway config: {err}")))?;
        let config_path = self
            .working_dir
            .join(GATEWAY_SERVICE_NAME)
            .join("local.yaml");
        self.home.write_file(&config_path, &gateway_yaml)?;

        let compose_yaml = serde_yaml::to_string(&project)
            .map_err(|err| RegistryError::Internal(format!("failed to render compose file: {err}")))?;

        self.run_compose(
            &artifact.key.name,
            &["up", "-d", "--wait"],
            Some(compose_yaml),
            COMPOSE_UP_TIMEOUT,
        )
        .await?;

        let mut state = self.load_state();
        state
            .projects
            .insert(artifact.key.name.clone(), artifact.hash.clone());
        self.save_state(&state)
    }

    async fn remove(&self, key: &ArtifactKey) -> Result<()> {
        self.run_compose(&key.name, &["down"], None, COMPOSE_UP_TIMEOUT)
            .await?;

        let mut state = self.load_state();
        state.projects.remove(&key.name);
        self.save_state(&state)
    }
}
