use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub registry: RegistryServer,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RegistryServer {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,
}

impl Default for RegistryServer {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            gateway_port: default_gateway_port(),
        }
    }
}

fn default_http_port() -> u16 {
    12121
}

fn default_gateway_port() -> u16 {
    21212
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum StoreConfig {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "postgres")]
    Postgres {
        host: String,
        port: u16,
        username: String,
        password: String,
        database: String,
        max_connection: u32,
        migrations_path: Option<String>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct RuntimeConfig {
    /// Reconcile the local docker compose target.
    #[serde(default = "default_true")]
    pub local: bool,
    /// Reconcile a Kubernetes cluster when configured.
    #[serde(default)]
    pub kubernetes: Option<KubernetesRuntime>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            local: true,
            kubernetes: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone)]
pub struct KubernetesRuntime {
    pub api_server: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ar_common::utils::replace_env_variables;

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.registry.http_port, 12121);
        assert_eq!(config.registry.gateway_port, 21212);
        assert!(matches!(config.store, StoreConfig::Memory));
        assert!(config.runtime.local);
        assert!(config.runtime.kubernetes.is_none());
    }

    #[test]
    fn test_full_config_with_env_substitution() {
        let raw = r#"
[registry]
http_port = 12121
gateway_port = 21212

[store]
type = "postgres"
host = "${AR_TEST_PG_HOST:pg.internal}"
port = "${AR_TEST_PG_PORT:5432}"
username = "registry"
password = "registry"
database = "registry"
max_connection = 10

[runtime]
local = true

[runtime.kubernetes]
api_server = "https://kube.example.io:6443"
namespace = "agents"
"#;
        let config: AppConfig =
            toml::from_str(&replace_env_variables(raw.to_string())).unwrap();

        match &config.store {
            StoreConfig::Postgres { host, port, .. } => {
                assert_eq!(host, "pg.internal");
                assert_eq!(*port, 5432);
            }
            other => panic!("expected postgres store, got {other:?}"),
        }

        let kube = config.runtime.kubernetes.unwrap();
        assert_eq!(kube.namespace, "agents");
        assert!(!kube.insecure);
    }
}
