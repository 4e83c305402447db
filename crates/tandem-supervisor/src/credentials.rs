//! Service-account credential resolution.
//!
//! Children find their Google credentials through path variables
//! (`GOOGLE_APPLICATION_CREDENTIALS` and friends). The supervisor decides once,
//! at startup, which file those variables point at. Nothing here is fatal: if
//! no credentials are found the children start anyway and fail on their own.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tandem_common::{Error, Result, ResultExt};
use tracing::{info, warn};

use crate::config::CredentialConfig;
use crate::environment::{EnvSnapshot, ENV_CREDENTIALS_PATH};

/// Where the resolved credentials came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// `GOOGLE_APPLICATION_CREDENTIALS` was already set.
    Explicit,
    /// Copied from the mounted secrets volume.
    MountedSecret { from: PathBuf },
    /// Found at a local fallback path.
    Fallback,
    /// Nothing found.
    Missing,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Explicit => write!(f, "explicit"),
            CredentialSource::MountedSecret { from } => {
                write!(f, "mounted secret {}", from.display())
            }
            CredentialSource::Fallback => write!(f, "fallback"),
            CredentialSource::Missing => write!(f, "missing"),
        }
    }
}

/// Outcome of credential resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub source: CredentialSource,
    pub path: Option<PathBuf>,
    /// Variables to add to the shared child environment.
    pub exports: BTreeMap<String, String>,
}

impl ResolvedCredentials {
    fn missing() -> Self {
        Self {
            source: CredentialSource::Missing,
            path: None,
            exports: BTreeMap::new(),
        }
    }

    fn at(source: CredentialSource, path: PathBuf, export_vars: &[String]) -> Self {
        let value = path.display().to_string();
        let exports = export_vars
            .iter()
            .map(|var| (var.clone(), value.clone()))
            .collect();

        Self {
            source,
            path: Some(path),
            exports,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.source == CredentialSource::Missing
    }
}

/// Resolve credentials: explicit variable, then mounted secret, then local
/// fallback files in order.
///
/// A mounted secret that cannot be copied is logged and resolution falls
/// through to the fallback paths.
pub fn resolve_credentials(config: &CredentialConfig, env: &EnvSnapshot) -> ResolvedCredentials {
    if let Some(explicit) = env.get_non_empty(ENV_CREDENTIALS_PATH) {
        let path = PathBuf::from(explicit);
        info!("Using credentials from {}: {}", ENV_CREDENTIALS_PATH, path.display());

        // Only mirror into the variables that are not already set.
        let mut resolved =
            ResolvedCredentials::at(CredentialSource::Explicit, path, &config.export_vars);
        resolved.exports.retain(|var, _| env.get_non_empty(var).is_none());
        return resolved;
    }

    let mounted = config.mounted_secret_path();
    if mounted.is_file() {
        match stage_secret(&mounted, &config.runtime_path) {
            Ok(()) => {
                info!(
                    "Credentials copied from mounted secret {} to {}",
                    mounted.display(),
                    config.runtime_path.display()
                );
                return ResolvedCredentials::at(
                    CredentialSource::MountedSecret { from: mounted },
                    config.runtime_path.clone(),
                    &config.export_vars,
                );
            }
            Err(e) => warn!("Failed to stage mounted secret: {}", e),
        }
    }

    if let Some(path) = config.fallback_paths.iter().find(|p| p.is_file()) {
        info!("Using local credentials file: {}", path.display());
        return ResolvedCredentials::at(
            CredentialSource::Fallback,
            path.clone(),
            &config.export_vars,
        );
    }

    warn!(
        "No credentials found (checked {} and {} fallback paths); children may fail to authenticate",
        mounted.display(),
        config.fallback_paths.len()
    );
    ResolvedCredentials::missing()
}

/// Copy `from` to `to`, creating parent directories. On unix the
/// destination is owner-only before any byte is written.
fn stage_secret(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)
            .map_err(Error::from)
            .context(format!("Failed to create {}", parent.display()))?;
    }

    let mut source = File::open(from)
        .map_err(|e| Error::credential(format!("Failed to open {}: {}", from.display(), e)))?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut dest = options
        .open(to)
        .map_err(|e| Error::credential(format!("Failed to create {}: {}", to.display(), e)))?;

    // `mode` only applies to new files; a leftover copy keeps its old mode.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        dest.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(Error::from)
            .context(format!("Failed to restrict permissions on {}", to.display()))?;
    }

    io::copy(&mut source, &mut dest).map_err(|e| {
        Error::credential(format!("Failed to copy {} to {}: {}", from.display(), to.display(), e))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ENV_SERVICE_ACCOUNT_KEY_PATH;

    const KEY: &str = r#"{"project_id": "demo"}"#;

    fn config_in(root: &Path) -> CredentialConfig {
        CredentialConfig {
            secrets_dir: root.join("secrets"),
            runtime_path: root.join("runtime").join("service-account.json"),
            fallback_paths: vec![root.join("first.json"), root.join("second.json")],
            ..CredentialConfig::default()
        }
    }

    #[test]
    fn test_fallback_file_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let fallback = dir.path().join("second.json");
        std::fs::write(&fallback, KEY).unwrap();

        let resolved = resolve_credentials(&config, &EnvSnapshot::default());

        assert_eq!(resolved.source, CredentialSource::Fallback);
        assert_eq!(resolved.path.as_deref(), Some(fallback.as_path()));
        let expected = fallback.display().to_string();
        assert_eq!(resolved.exports.get(ENV_CREDENTIALS_PATH), Some(&expected));
        assert_eq!(resolved.exports.get(ENV_SERVICE_ACCOUNT_KEY_PATH), Some(&expected));
    }

    #[test]
    fn test_first_fallback_wins() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(dir.path().join("first.json"), KEY).unwrap();
        std::fs::write(dir.path().join("second.json"), KEY).unwrap();

        let resolved = resolve_credentials(&config, &EnvSnapshot::default());
        assert_eq!(resolved.path, Some(dir.path().join("first.json")));
    }

    #[test]
    fn test_nothing_found_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let resolved = resolve_credentials(&config, &EnvSnapshot::default());

        assert!(resolved.is_missing());
        assert!(resolved.path.is_none());
        assert!(resolved.exports.is_empty());
    }

    #[test]
    fn test_mounted_secret_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mounted = config.mounted_secret_path();
        std::fs::create_dir_all(mounted.parent().unwrap()).unwrap();
        std::fs::write(&mounted, KEY).unwrap();
        // A fallback must not win over the mounted secret.
        std::fs::write(dir.path().join("first.json"), "{}").unwrap();

        let resolved = resolve_credentials(&config, &EnvSnapshot::default());

        assert_eq!(resolved.source, CredentialSource::MountedSecret { from: mounted });
        assert_eq!(resolved.path.as_deref(), Some(config.runtime_path.as_path()));
        assert_eq!(std::fs::read_to_string(&config.runtime_path).unwrap(), KEY);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&config.runtime_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_staged_secret_is_never_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mounted = config.mounted_secret_path();
        std::fs::create_dir_all(mounted.parent().unwrap()).unwrap();
        std::fs::write(&mounted, KEY).unwrap();
        std::fs::set_permissions(&mounted, std::fs::Permissions::from_mode(0o644)).unwrap();

        // A stale, readable copy from an earlier run.
        std::fs::create_dir_all(config.runtime_path.parent().unwrap()).unwrap();
        std::fs::write(&config.runtime_path, "stale and longer than the new key").unwrap();
        std::fs::set_permissions(&config.runtime_path, std::fs::Permissions::from_mode(0o644))
            .unwrap();

        let resolved = resolve_credentials(&config, &EnvSnapshot::default());

        assert!(matches!(resolved.source, CredentialSource::MountedSecret { .. }));
        assert_eq!(std::fs::read_to_string(&config.runtime_path).unwrap(), KEY);
        let mode = std::fs::metadata(&config.runtime_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        // The source keeps its own mode.
        let source_mode = std::fs::metadata(&mounted).unwrap().permissions().mode();
        assert_eq!(source_mode & 0o777, 0o644);
    }

    #[test]
    fn test_explicit_variable_wins() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(dir.path().join("first.json"), KEY).unwrap();

        let env = EnvSnapshot::from_vars([(ENV_CREDENTIALS_PATH, "/etc/creds.json")]);
        let resolved = resolve_credentials(&config, &env);

        assert_eq!(resolved.source, CredentialSource::Explicit);
        assert_eq!(resolved.path, Some(PathBuf::from("/etc/creds.json")));
        // Already set in the environment, so not re-exported.
        assert!(!resolved.exports.contains_key(ENV_CREDENTIALS_PATH));
        assert_eq!(
            resolved.exports.get(ENV_SERVICE_ACCOUNT_KEY_PATH).map(String::as_str),
            Some("/etc/creds.json")
        );
    }
}
