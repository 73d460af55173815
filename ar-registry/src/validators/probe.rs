use super::UpstreamProbe;
use super::oci::OciReference;
use crate::model::RegistryType;
use ar_common::{RegistryError, Result};
use std::collections::HashMap;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

/// Probe backed by real upstream registries: the npm registry, PyPI, and
/// the OCI distribution API (anonymous pull-scope tokens).
pub struct HttpUpstreamProbe {
    client: reqwest::Client,
}

impl HttpUpstreamProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }

    async fn fetch_manifest(
        &self,
        reference: &OciReference,
        manifest_ref: &str,
        token: Option<&str>,
    ) -> Result<serde_json::Value> {
        let host = match reference.registry.as_str() {
            // Docker Hub serves the distribution API from a different host.
            "docker.io" => "registry-1.docker.io",
            other => other,
        };
        let url = format!(
            "https://{host}/v2/{}/manifests/{manifest_ref}",
            reference.repository
        );

        let mut request = self.client.get(&url).header("Accept", MANIFEST_ACCEPT);
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|err| RegistryError::Upstream(err.to_string()))?;

        match response.status().as_u16() {
            200 => response
                .json::<serde_json::Value>()
                .await
                .map_err(|err| RegistryError::Upstream(err.to_string())),
            401 if token.is_none() => {
                let challenge = response
                    .headers()
                    .get("www-authenticate")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        RegistryError::Upstream(format!("401 without challenge from {host}"))
                    })?;
                let token = self.fetch_token(&challenge, reference).await?;
                Box::pin(self.fetch_manifest(reference, manifest_ref, Some(&token))).await
            }
            404 => Err(RegistryError::validation(
                "identifier",
                format!("image {reference} does not exist"),
            )),
            status if status >= 500 => Err(RegistryError::Upstream(format!(
                "{host} responded with {status}"
            ))),
            status => Err(RegistryError::validation(
                "identifier",
                format!("registry {host} responded with {status} for {reference}"),
            )),
        }
    }

    async fn fetch_token(&self, challenge: &str, reference: &OciReference) -> Result<String> {
        let params = parse_bearer_challenge(challenge)
            .ok_or_else(|| RegistryError::Upstream(format!("unparsable challenge: {challenge}")))?;

        let scope = format!("repository:{}:pull", reference.repository);
        let mut url = url::Url::parse(&params.realm)
            .map_err(|err| RegistryError::Upstream(format!("bad token realm: {err}")))?;
        if let Some(service) = &params.service {
            url.query_pairs_mut().append_pair("service", service);
        }
        url.query_pairs_mut().append_pair("scope", &scope);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| RegistryError::Upstream(err.to_string()))?;
        if !response.status().is_success() {
            return Err(RegistryError::Upstream(format!(
                "token endpoint responded with {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| RegistryError::Upstream(err.to_string()))?;
        body.get("token")
            .or_else(|| body.get("access_token"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| RegistryError::Upstream("token endpoint returned no token".to_string()))
    }
}

impl Default for HttpUpstreamProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UpstreamProbe for HttpUpstreamProbe {
    async fn package_exists(
        &self,
        registry: RegistryType,
        identifier: &str,
        version: &str,
    ) -> Result<bool> {
        let url = match registry {
            RegistryType::Npm => {
                format!("https://registry.npmjs.org/{identifier}/{version}")
            }
            RegistryType::Pypi => {
                format!("https://pypi.org/pypi/{identifier}/{version}/json")
            }
            RegistryType::Oci => {
                return Err(RegistryError::Internal(
                    "OCI existence is checked through image_annotations".to_string(),
                ));
            }
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| RegistryError::Upstream(err.to_string()))?;

        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status if status >= 500 => {
                Err(RegistryError::Upstream(format!("{url} responded with {status}")))
            }
            _ => Ok(false),
        }
    }

    async fn image_annotations(
        &self,
        reference: &OciReference,
    ) -> Result<HashMap<String, String>> {
        let mut manifest = self
            .fetch_manifest(reference, &reference.reference(), None)
            .await?;

        // A multi-arch index points at per-platform manifests; the
        // annotations live on the leaf manifest.
        if let Some(entries) = manifest.get("manifests").and_then(|v| v.as_array())
            && let Some(digest) = entries
                .first()
                .and_then(|entry| entry.get("digest"))
                .and_then(|v| v.as_str())
        {
            let digest = digest.to_string();
            manifest = self.fetch_manifest(reference, &digest, None).await?;
        }

        let annotations = manifest
            .get("annotations")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(annotations)
    }
}

struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    for part in rest.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        let value = value.trim_matches('"').to_string();
        match key {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            _ => {}
        }
    }
    Some(BearerChallenge {
        realm: realm?,
        service,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io""#;
        let parsed = parse_bearer_challenge(challenge).unwrap();
        assert_eq!(parsed.realm, "https://auth.docker.io/token");
        assert_eq!(parsed.service.as_deref(), Some("registry.docker.io"));

        assert!(parse_bearer_challenge("Basic realm=x").is_none());
    }
}
