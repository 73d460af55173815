use crate::model::{RegistryType, TRANSPORT_STDIO, TRANSPORT_STREAMABLE_HTTP};
use ar_common::{RegistryError, Result};

pub const DEFAULT_STREAMABLE_HTTP_URL: &str = "http://localhost:3000/mcp";

/// Normalizes a `(type, url)` transport tuple:
/// stdio drops any URL, streamable-http gets the default URL when empty,
/// anything else is rejected.
pub fn resolve(kind: &str, url: &str) -> Result<(String, String)> {
    match kind {
        TRANSPORT_STDIO => Ok((TRANSPORT_STDIO.to_string(), String::new())),
        TRANSPORT_STREAMABLE_HTTP => {
            let url = if url.is_empty() {
                DEFAULT_STREAMABLE_HTTP_URL.to_string()
            } else {
                url.to_string()
            };
            Ok((TRANSPORT_STREAMABLE_HTTP.to_string(), url))
        }
        other => Err(RegistryError::validation(
            "transport",
            format!("invalid transport: {other}"),
        )),
    }
}

/// Command used to launch a package when the manifest does not say.
pub fn default_runtime_hint(registry: RegistryType) -> &'static str {
    match registry {
        RegistryType::Npm => "npx",
        RegistryType::Pypi => "uvx",
        RegistryType::Oci => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let cases = vec![
            (("stdio", ""), Some(("stdio", ""))),
            (("stdio", "http://ignored"), Some(("stdio", ""))),
            (
                ("streamable-http", ""),
                Some(("streamable-http", DEFAULT_STREAMABLE_HTTP_URL)),
            ),
            (
                ("streamable-http", "http://svc:8080/mcp"),
                Some(("streamable-http", "http://svc:8080/mcp")),
            ),
            (("http", "http://svc/mcp"), None),
            (("sse", ""), None),
            (("", ""), None),
        ];

        for ((kind, url), want) in cases {
            let got = resolve(kind, url);
            match want {
                Some((want_kind, want_url)) => {
                    let (kind, url) = got.unwrap();
                    assert_eq!(kind, want_kind);
                    assert_eq!(url, want_url);
                }
                None => {
                    let err = got.unwrap_err();
                    assert!(err.to_string().contains("invalid transport"), "got: {err}");
                }
            }
        }
    }

    #[test]
    fn test_default_runtime_hint() {
        assert_eq!(default_runtime_hint(RegistryType::Npm), "npx");
        assert_eq!(default_runtime_hint(RegistryType::Pypi), "uvx");
        assert_eq!(default_runtime_hint(RegistryType::Oci), "");
    }
}
