use super::{UpstreamProbe, with_retries};
use crate::model::Package;
use ar_common::{RegistryError, Result};
use std::fmt::Display;
use std::str::FromStr;

/// Annotation an MCP server image must carry; its value proves ownership
/// of the declaring server name.
pub const MCP_NAME_ANNOTATION: &str = "io.modelcontextprotocol.server.name";

const ALLOWED_REGISTRIES: [&str; 2] = ["docker.io", "ghcr.io"];
const ALLOWED_REGISTRY_SUFFIX: &str = ".pkg.dev";

/// Parsed `registry/repository[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl OciReference {
    /// Tag, digest, or `latest`: whatever identifies the manifest.
    pub fn reference(&self) -> String {
        if let Some(digest) = &self.digest {
            return digest.clone();
        }
        self.tag.clone().unwrap_or_else(|| "latest".to_string())
    }

    pub fn allowlisted(&self) -> bool {
        ALLOWED_REGISTRIES.contains(&self.registry.as_str())
            || self.registry.ends_with(ALLOWED_REGISTRY_SUFFIX)
    }
}

impl FromStr for OciReference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty reference".to_string());
        }

        let (remainder, digest) = match s.split_once('@') {
            Some((head, digest)) => {
                if !digest.starts_with("sha256:") {
                    return Err(format!("invalid digest: {digest}"));
                }
                (head, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // The first segment is a registry host only if it looks like one.
        let (registry, mut repository) = match remainder.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => ("docker.io".to_string(), remainder.to_string()),
        };

        let tag = match repository.rsplit_once(':') {
            Some((head, tag)) if !tag.contains('/') => {
                let tag = tag.to_string();
                repository = head.to_string();
                Some(tag)
            }
            _ => None,
        };

        if repository.is_empty() {
            return Err(format!("missing repository in {s}"));
        }
        if registry == "docker.io" && !repository.contains('/') {
            repository = format!("library/{repository}");
        }

        Ok(OciReference {
            registry,
            repository,
            tag,
            digest,
        })
    }
}

impl Display for OciReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// OCI package rules: no legacy fields, allowlisted registry, and the
/// image manifest must carry the ownership annotation matching the
/// declaring server name.
pub async fn validate_oci(
    probe: &dyn UpstreamProbe,
    pkg: &Package,
    server_name: &str,
) -> Result<()> {
    if !pkg.registry_base_url.is_empty() {
        return Err(RegistryError::validation(
            "registryBaseUrl",
            "OCI packages must not have 'registryBaseUrl' field",
        ));
    }
    if !pkg.version.is_empty() {
        return Err(RegistryError::validation(
            "version",
            "OCI packages must not have 'version' field",
        ));
    }
    if !pkg.file_sha256.is_empty() {
        return Err(RegistryError::validation(
            "fileSha256",
            "OCI packages must not have 'fileSha256' field",
        ));
    }

    let reference = OciReference::from_str(&pkg.identifier)
        .map_err(|reason| RegistryError::validation("identifier", format!("invalid OCI reference: {reason}")))?;

    if !reference.allowlisted() {
        return Err(RegistryError::validation(
            "identifier",
            format!("unsupported OCI registry: {}", reference.registry),
        ));
    }

    let annotations = with_retries(|| probe.image_annotations(&reference))
        .await
        .map_err(|err| match err {
            RegistryError::Upstream(reason) => RegistryError::validation(
                "identifier",
                format!("upstream unavailable: {reason}"),
            ),
            other => other,
        })?;

    let Some(owner) = annotations.get(MCP_NAME_ANNOTATION) else {
        return Err(RegistryError::validation(
            "identifier",
            format!("missing required annotation '{MCP_NAME_ANNOTATION}' on {reference}"),
        ));
    };

    if owner != server_name {
        return Err(RegistryError::validation(
            "identifier",
            format!(
                "ownership validation failed: Expected annotation {MCP_NAME_ANNOTATION}={server_name}, got {owner}"
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::tests::FakeProbe;

    fn oci_package(identifier: &str) -> Package {
        Package {
            registry_type: "oci".to_string(),
            identifier: identifier.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_reference_parsing() {
        let cases = vec![
            (
                "ghcr.io/github/github-mcp-server:latest",
                ("ghcr.io", "github/github-mcp-server", Some("latest"), None),
            ),
            (
                "docker.io/library/alpine:latest",
                ("docker.io", "library/alpine", Some("latest"), None),
            ),
            (
                "library/hello-world:latest",
                ("docker.io", "library/hello-world", Some("latest"), None),
            ),
            ("alpine", ("docker.io", "library/alpine", None, None)),
            (
                "us-central1-docker.pkg.dev/proj/repo/img:1.0",
                ("us-central1-docker.pkg.dev", "proj/repo/img", Some("1.0"), None),
            ),
            (
                "ghcr.io/x/y@sha256:abcd",
                ("ghcr.io", "x/y", None, Some("sha256:abcd")),
            ),
        ];

        for (input, (registry, repository, tag, digest)) in cases {
            let parsed: OciReference = input.parse().unwrap();
            assert_eq!(parsed.registry, registry, "registry for {input}");
            assert_eq!(parsed.repository, repository, "repository for {input}");
            assert_eq!(parsed.tag.as_deref(), tag, "tag for {input}");
            assert_eq!(parsed.digest.as_deref(), digest, "digest for {input}");
        }

        assert!("".parse::<OciReference>().is_err());
        assert!("ghcr.io/x@md5:zz".parse::<OciReference>().is_err());
    }

    #[tokio::test]
    async fn test_registry_allowlist() {
        let probe = FakeProbe::with_annotations(&[]);

        let rejected = vec![
            "gcr.io/test/image:latest",
            "quay.io/test/image:latest",
            "public.ecr.aws/test/image:latest",
            "registry.gitlab.com/test/image:latest",
            "harbor.example.com/test/image:latest",
        ];
        for identifier in rejected {
            let err = validate_oci(&probe, &oci_package(identifier), "com.example/test")
                .await
                .unwrap_err();
            assert!(
                err.to_string().contains("unsupported OCI registry"),
                "expected allowlist rejection for {identifier}, got {err}"
            );
        }

        // Allowed registries get past the allowlist and fail on the
        // missing annotation instead.
        let allowed = vec![
            "docker.io/library/alpine:latest",
            "library/hello-world:latest",
            "ghcr.io/containerbase/base:latest",
            "us-central1-docker.pkg.dev/database-toolbox/toolbox/toolbox:latest",
        ];
        for identifier in allowed {
            let err = validate_oci(&probe, &oci_package(identifier), "com.example/test")
                .await
                .unwrap_err();
            assert!(
                err.to_string().contains("missing required annotation"),
                "expected annotation failure for {identifier}, got {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_rejects_legacy_fields() {
        let probe = FakeProbe::with_annotations(&[]);

        let mut with_base_url = oci_package("docker.io/test/image:latest");
        with_base_url.registry_base_url = "https://docker.io".to_string();
        let err = validate_oci(&probe, &with_base_url, "com.example/test").await.unwrap_err();
        assert!(err.to_string().contains("must not have 'registryBaseUrl'"));

        let mut with_version = oci_package("docker.io/test/image:latest");
        with_version.version = "1.0.0".to_string();
        let err = validate_oci(&probe, &with_version, "com.example/test").await.unwrap_err();
        assert!(err.to_string().contains("must not have 'version'"));

        let mut with_sha = oci_package("docker.io/test/image:latest");
        with_sha.file_sha256 = "abcd1234".to_string();
        let err = validate_oci(&probe, &with_sha, "com.example/test").await.unwrap_err();
        assert!(err.to_string().contains("must not have 'fileSha256'"));
    }

    #[tokio::test]
    async fn test_ownership_match() {
        let probe = FakeProbe::with_annotations(&[(
            MCP_NAME_ANNOTATION,
            "io.github.github/github-mcp-server",
        )]);

        validate_oci(
            &probe,
            &oci_package("ghcr.io/github/github-mcp-server:latest"),
            "io.github.github/github-mcp-server",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_ownership_mismatch() {
        let probe = FakeProbe::with_annotations(&[(
            MCP_NAME_ANNOTATION,
            "io.github.github/github-mcp-server",
        )]);

        let err = validate_oci(
            &probe,
            &oci_package("ghcr.io/github/github-mcp-server:latest"),
            "io.github.github/github-mcp-server-mismatch",
        )
        .await
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("ownership validation failed"), "got: {message}");
        assert!(message.contains("Expected annotation"), "got: {message}");
    }
}
