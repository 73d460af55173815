use crate::model::ManifestKind;
use ar_common::{RegistryError, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    Publish,
}

#[derive(Debug, Clone)]
pub struct Resource {
    pub kind: ManifestKind,
    pub name: String,
}

/// Capability check at the publish entry points. Injected so deployments
/// can plug an organization-specific policy in.
#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    async fn check(&self, token: Option<&str>, action: Action, resource: &Resource) -> Result<()>;
}

/// Compares the bearer token against `AGENT_REGISTRY_TOKEN`. When the
/// variable is unset the registry runs open, which is the local
/// development mode.
#[derive(Debug, Default)]
pub struct StaticTokenAuthorizer {
    token: Option<String>,
}

impl StaticTokenAuthorizer {
    pub fn from_env() -> Self {
        let token = match std::env::var("AGENT_REGISTRY_TOKEN") {
            Ok(value) if !value.is_empty() => Some(value),
            _ => {
                tracing::warn!("AGENT_REGISTRY_TOKEN is not set, publish runs unauthenticated");
                None
            }
        };
        Self { token }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }
}

#[async_trait::async_trait]
impl Authorizer for StaticTokenAuthorizer {
    async fn check(&self, token: Option<&str>, _action: Action, resource: &Resource) -> Result<()> {
        let Some(expected) = &self.token else {
            return Ok(());
        };

        match token {
            Some(presented) if presented == expected => Ok(()),
            Some(_) => Err(RegistryError::Unauthorized(format!(
                "invalid token for {} {}",
                resource.kind, resource.name
            ))),
            None => Err(RegistryError::Unauthorized(
                "missing bearer token".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_authorizer() {
        let authz = StaticTokenAuthorizer::with_token("s3cret");
        let resource = Resource {
            kind: ManifestKind::Server,
            name: "io.example/weather".to_string(),
        };

        assert!(authz.check(Some("s3cret"), Action::Publish, &resource).await.is_ok());
        assert!(authz.check(Some("wrong"), Action::Publish, &resource).await.is_err());
        assert!(authz.check(None, Action::Publish, &resource).await.is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_authorizer_allows() {
        let authz = StaticTokenAuthorizer::default();
        let resource = Resource {
            kind: ManifestKind::Skill,
            name: "io.example/summarize".to_string(),
        };
        assert!(authz.check(None, Action::Publish, &resource).await.is_ok());
    }
}
