use crate::home::ArctlHome;
use ar_common::{RegistryError, Result};
use std::fs;
use std::path::PathBuf;

/// Rewrites localhost cluster URLs so a container can reach a cluster
/// running on the host. Returns `None` when no cluster points at
/// localhost, i.e. patching is a no-op. The input is never mutated.
pub fn patch_kubeconfig(content: &str) -> Result<Option<String>> {
    if !content.contains("localhost") && !content.contains("127.0.0.1") {
        return Ok(None);
    }

    let mut kubeconfig: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|err| RegistryError::Internal(format!("unparsable kubeconfig: {err}")))?;

    let Some(clusters) = kubeconfig
        .get_mut("clusters")
        .and_then(|v| v.as_sequence_mut())
    else {
        return Ok(None);
    };

    let mut patched = false;
    for entry in clusters {
        let Some(cluster) = entry.get_mut("cluster") else {
            continue;
        };
        let Some(server) = cluster.get("server").and_then(|v| v.as_str()) else {
            continue;
        };
        if !server.contains("localhost") && !server.contains("127.0.0.1") {
            continue;
        }

        let rewritten = server
            .replace("localhost", "host.docker.internal")
            .replace("127.0.0.1", "host.docker.internal");
        let Some(map) = cluster.as_mapping_mut() else {
            continue;
        };
        map.insert("server".into(), rewritten.into());
        // The cluster cert is not valid for host.docker.internal.
        map.insert("insecure-skip-tls-verify".into(), true.into());
        map.remove(&serde_yaml::Value::from("certificate-authority-data"));
        map.remove(&serde_yaml::Value::from("certificate-authority"));
        patched = true;
    }

    if !patched {
        return Ok(None);
    }

    let out = serde_yaml::to_string(&kubeconfig)
        .map_err(|err| RegistryError::Internal(format!("failed to render kubeconfig: {err}")))?;
    Ok(Some(out))
}

/// Reads `~/.kube/config`, patches it if it targets a local cluster, and
/// writes the copy under the arctl home. Returns the path of the file a
/// compose bind-mount should use instead of the original.
pub fn prepare_kubeconfig(home: &ArctlHome) -> Result<Option<PathBuf>> {
    let home_dir = std::env::var("HOME")
        .map_err(|_| RegistryError::Internal("HOME is not set".to_string()))?;
    let kubeconfig_path = PathBuf::from(home_dir).join(".kube").join("config");

    let content = match fs::read_to_string(&kubeconfig_path) {
        Ok(content) => content,
        Err(_) => return Ok(None),
    };

    match patch_kubeconfig(&content)? {
        None => Ok(None),
        Some(patched) => {
            let target = home.kubeconfig_path();
            home.write_secret(&target, &patched)?;
            Ok(Some(target))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL_KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: kind-local
  cluster:
    server: https://127.0.0.1:6443
    certificate-authority-data: LS0tCg==
- name: prod
  cluster:
    server: https://prod.example.io:6443
    certificate-authority-data: LS0tCg==
contexts:
- name: kind-local
  context:
    cluster: kind-local
    user: kind-local
"#;

    #[test]
    fn test_patch_is_noop_without_local_clusters() {
        let content = "clusters:\n- name: prod\n  cluster:\n    server: https://prod.example.io:6443\n";
        assert!(patch_kubeconfig(content).unwrap().is_none());
    }

    #[test]
    fn test_patch_rewrites_only_local_clusters() {
        let patched = patch_kubeconfig(LOCAL_KUBECONFIG).unwrap().unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&patched).unwrap();
        let clusters = value["clusters"].as_sequence().unwrap();

        let local = &clusters[0]["cluster"];
        assert_eq!(
            local["server"].as_str().unwrap(),
            "https://host.docker.internal:6443"
        );
        assert_eq!(local["insecure-skip-tls-verify"].as_bool(), Some(true));
        assert!(local.get("certificate-authority-data").is_none());

        let prod = &clusters[1]["cluster"];
        assert_eq!(prod["server"].as_str().unwrap(), "https://prod.example.io:6443");
        assert!(prod.get("insecure-skip-tls-verify").is_none());
        assert!(prod.get("certificate-authority-data").is_some());
    }

    #[test]
    fn test_patch_handles_localhost_hostname() {
        let content = "clusters:\n- name: l\n  cluster:\n    server: https://localhost:6443\n";
        let patched = patch_kubeconfig(content).unwrap().unwrap();
        assert!(patched.contains("host.docker.internal:6443"));
        assert!(!patched.contains("localhost"));
    }
}
