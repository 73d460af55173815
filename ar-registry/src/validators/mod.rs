pub mod oci;
pub mod probe;
pub mod transport;

use crate::model::{Remote, RegistryType, ServerDetail};
use ar_common::{RegistryError, Result};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

const UPSTREAM_RETRIES: usize = 2;
const UPSTREAM_BACKOFF: Duration = Duration::from_millis(500);

/// Probe into upstream package registries. Network access lives behind
/// this trait so validators stay testable.
#[async_trait::async_trait]
pub trait UpstreamProbe: Send + Sync {
    /// True when `identifier@version` exists in the given registry.
    async fn package_exists(
        &self,
        registry: RegistryType,
        identifier: &str,
        version: &str,
    ) -> Result<bool>;

    /// Annotations of the image manifest behind an OCI reference.
    async fn image_annotations(
        &self,
        reference: &oci::OciReference,
    ) -> Result<HashMap<String, String>>;
}

/// Retries upstream failures with a flat backoff; other error kinds pass
/// through untouched.
pub(crate) async fn with_retries<F, Fut, T>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(RegistryError::Upstream(reason)) if attempt < UPSTREAM_RETRIES => {
                attempt += 1;
                tracing::warn!(
                    "Upstream probe failed (attempt {}/{}): {}",
                    attempt,
                    UPSTREAM_RETRIES,
                    reason
                );
                tokio::time::sleep(UPSTREAM_BACKOFF).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Validates and normalizes a server document in place: registry types
/// lower-cased, transports resolved, runtime hints defaulted, package
/// existence and OCI ownership checked upstream.
pub async fn validate_server(probe: &dyn UpstreamProbe, server: &mut ServerDetail) -> Result<()> {
    if server.packages.is_empty() && server.remotes.is_empty() {
        return Err(RegistryError::validation(
            "packages",
            "at least one package or remote is required",
        ));
    }

    for pkg in &mut server.packages {
        pkg.registry_type = pkg.registry_type.to_lowercase();
        let registry = RegistryType::from_str(&pkg.registry_type)
            .map_err(|reason| RegistryError::validation("registryType", reason))?;

        let (kind, url) = transport::resolve(&pkg.transport.kind, &pkg.transport.url)?;
        pkg.transport.kind = kind;
        pkg.transport.url = url;

        if pkg.runtime_hint.is_empty() {
            pkg.runtime_hint = transport::default_runtime_hint(registry).to_string();
        }

        match registry {
            RegistryType::Npm | RegistryType::Pypi => {
                let exists = with_retries(|| {
                    probe.package_exists(registry, &pkg.identifier, &pkg.version)
                })
                .await
                .map_err(upstream_to_validation)?;
                if !exists {
                    return Err(RegistryError::validation(
                        "identifier",
                        format!(
                            "package {}@{} does not exist in {}",
                            pkg.identifier, pkg.version, registry
                        ),
                    ));
                }
            }
            RegistryType::Oci => {
                oci::validate_oci(probe, pkg, &server.name).await?;
            }
        }
    }

    for remote in &mut server.remotes {
        validate_remote(remote)?;
    }

    Ok(())
}

/// Remote endpoints must be absolute http(s) URLs; the scheme is
/// lower-cased, headers are kept verbatim.
pub fn validate_remote(remote: &mut Remote) -> Result<()> {
    let parsed = url::Url::parse(&remote.url)
        .map_err(|err| RegistryError::validation("url", format!("invalid remote URL: {err}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(RegistryError::validation(
                "url",
                format!("remote URL scheme must be http or https, got {other}"),
            ));
        }
    }
    // Url::parse already lower-cases the scheme; keep the normalized form.
    remote.url = parsed.to_string();
    Ok(())
}

fn upstream_to_validation(err: RegistryError) -> RegistryError {
    match err {
        RegistryError::Upstream(reason) => {
            RegistryError::validation("identifier", format!("upstream unavailable: {reason}"))
        }
        other => other,
    }
}
