use ar_common::{RegistryError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const HOME_DIR_NAME: &str = ".arctl";
const CONFIG_FILE_NAME: &str = "config";
const RUNTIME_DIR_NAME: &str = "runtime";

#[cfg(unix)]
const DIR_MODE: u32 = 0o755;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;
#[cfg(unix)]
const SECRET_MODE: u32 = 0o600;

/// On-disk state under `$HOME/.arctl/`: per-run runtime directories, the
/// patched kubeconfig, and a `key=value` config file.
#[derive(Debug, Clone)]
pub struct ArctlHome {
    root: PathBuf,
}

impl ArctlHome {
    pub fn new() -> Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| RegistryError::Internal("HOME is not set".to_string()))?;
        Self::at(Path::new(&home).join(HOME_DIR_NAME))
    }

    pub fn at(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .map_err(|err| RegistryError::Internal(format!("failed to create {root:?}: {err}")))?;
        set_mode(&root, dir_mode())?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn kubeconfig_path(&self) -> PathBuf {
        self.root.join("kubeconfig")
    }

    /// Creates `runtime/<prefix><hex>/` for one reconciler run.
    pub fn new_runtime_dir(&self, prefix: &str) -> Result<PathBuf> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let dir = self
            .root
            .join(RUNTIME_DIR_NAME)
            .join(format!("{prefix}{}", &suffix[..8]));
        fs::create_dir_all(&dir)
            .map_err(|err| RegistryError::Internal(format!("failed to create {dir:?}: {err}")))?;
        set_mode(&dir, dir_mode())?;
        Ok(dir)
    }

    /// Reads one key from the `key=value` config file. Missing file or
    /// key both read as empty.
    pub fn get_config(&self, key: &str) -> Result<String> {
        Ok(self
            .read_config()?
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .unwrap_or_default())
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() || key.contains('=') {
            return Err(RegistryError::validation("key", "invalid config key"));
        }
        let mut pairs = self.read_config()?;
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value.to_string(),
            None => pairs.push((key.to_string(), value.to_string())),
        }
        let mut content = String::new();
        for (k, v) in &pairs {
            content.push_str(&format!("{k}={v}\n"));
        }
        self.write_file(&self.config_path(), &content)
    }

    /// All `key=value` pairs, one per line. Lines without `=` are
    /// skipped; `#` has no special meaning.
    pub fn read_config(&self) -> Result<Vec<(String, String)>> {
        let path = self.config_path();
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(RegistryError::Internal(format!(
                    "failed to read {path:?}: {err}"
                )));
            }
        };

        Ok(data
            .lines()
            .filter_map(|line| {
                line.split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            })
            .collect())
    }

    /// Writes a world-readable file (mode 0644).
    pub fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        write_with_mode(path, content, file_mode())
    }

    /// Writes a secret file (mode 0600).
    pub fn write_secret(&self, path: &Path, content: &str) -> Result<()> {
        write_with_mode(path, content, secret_mode())
    }
}

fn write_with_mode(path: &Path, content: &str, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| RegistryError::Internal(format!("failed to create {parent:?}: {err}")))?;
    }
    fs::write(path, content)
        .map_err(|err| RegistryError::Internal(format!("failed to write {path:?}: {err}")))?;
    set_mode(path, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|err| RegistryError::Internal(format!("failed to chmod {path:?}: {err}")))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn dir_mode() -> u32 {
    DIR_MODE
}
#[cfg(unix)]
fn file_mode() -> u32 {
    FILE_MODE
}
#[cfg(unix)]
fn secret_mode() -> u32 {
    SECRET_MODE
}

#[cfg(not(unix))]
fn dir_mode() -> u32 {
    0
}
#[cfg(not(unix))]
fn file_mode() -> u32 {
    0
}
#[cfg(not(unix))]
fn secret_mode() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> (tempfile::TempDir, ArctlHome) {
        let dir = tempfile::tempdir().unwrap();
        let home = ArctlHome::at(dir.path().join(".arctl")).unwrap();
        (dir, home)
    }

    #[test]
    fn test_config_get_set_round_trip() {
        let (_guard, home) = home();

        assert_eq!(home.get_config("registry").unwrap(), "");

        home.set_config("registry", "ghcr.io/example").unwrap();
        home.set_config("gateway_port", "21212").unwrap();
        assert_eq!(home.get_config("registry").unwrap(), "ghcr.io/example");

        home.set_config("registry", "docker.io/example").unwrap();
        assert_eq!(home.get_config("registry").unwrap(), "docker.io/example");

        let pairs = home.read_config().unwrap();
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_set_config_rejects_bad_keys() {
        let (_guard, home) = home();
        assert!(home.set_config("", "x").is_err());
        assert!(home.set_config("a=b", "x").is_err());
    }

    #[test]
    fn test_runtime_dirs_are_unique() {
        let (_guard, home) = home();
        let first = home.new_runtime_dir("compose-").unwrap();
        let second = home.new_runtime_dir("compose-").unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir());
        assert!(
            first
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("compose-")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_files_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let (_guard, home) = home();
        let path = home.root().join("token");
        home.write_secret(&path, "s3cret").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
