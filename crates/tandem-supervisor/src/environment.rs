//! Environment snapshot and validation.
//!
//! The environment is read exactly once, at startup, into an [`EnvSnapshot`].
//! Everything downstream (default process layout, credential resolution,
//! validation) reads from the snapshot; nothing writes to the process-wide
//! environment. Values from a `.env` file override inherited ones and are
//! handed to children through the shared child environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tandem_common::{Error, Result};
use tracing::{debug, info, warn};

/// `.env` locations tried in order when no explicit file is given.
pub const DOTENV_CANDIDATES: &[&str] = &["./.env", "/app/.env"];

pub const ENV_PORT: &str = "PORT";
pub const ENV_MCP_HTTP_PORT: &str = "MCP_HTTP_PORT";
pub const ENV_MCP_TRANSPORT: &str = "MCP_TRANSPORT";
pub const ENV_STORAGE_BUCKET: &str = "FIREBASE_STORAGE_BUCKET";
pub const ENV_CLOUD_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
pub const ENV_CREDENTIALS_PATH: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const ENV_SERVICE_ACCOUNT_KEY_PATH: &str = "SERVICE_ACCOUNT_KEY_PATH";
pub const ENV_SECRETS_DIR: &str = "SECRETS_DIR";
pub const ENV_HEALTH_PORT: &str = "HEALTH_PORT";
pub const ENV_FIREBASE_MCP_COMMAND: &str = "FIREBASE_MCP_COMMAND";
pub const ENV_COORDINATOR_COMMAND: &str = "COORDINATOR_COMMAND";

/// Immutable view of the startup environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    inherited: BTreeMap<String, String>,
    dotenv: BTreeMap<String, String>,
    dotenv_path: Option<PathBuf>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    pub fn capture() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build a snapshot from explicit pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            inherited: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            dotenv: BTreeMap::new(),
            dotenv_path: None,
        }
    }

    /// Layer the entries of `path` over the inherited environment.
    pub fn with_dotenv_file(mut self, path: &Path) -> Result<Self> {
        let iter = dotenvy::from_path_iter(path).map_err(|e| {
            Error::validation(format!("Failed to open .env file {}: {}", path.display(), e))
        })?;

        let mut loaded = BTreeMap::new();
        for item in iter {
            match item {
                Ok((key, value)) => {
                    loaded.insert(key, value);
                }
                Err(e) => {
                    warn!("Skipping malformed .env entry in {}: {}", path.display(), e);
                }
            }
        }

        info!("Loaded {} variables from {}", loaded.len(), path.display());
        self.dotenv = loaded;
        self.dotenv_path = Some(path.to_path_buf());
        Ok(self)
    }

    /// Load the first existing `.env` among `candidates`, if any.
    pub fn with_first_dotenv<P: AsRef<Path>>(self, candidates: &[P]) -> Result<Self> {
        let found = candidates
            .iter()
            .map(|p| AsRef::<Path>::as_ref(p))
            .find(|p| p.is_file());

        match found {
            Some(path) => self.with_dotenv_file(path),
            None => {
                debug!("No .env file found at candidate paths");
                Ok(self)
            }
        }
    }

    /// Look up a variable; `.env` values win over inherited ones.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.dotenv
            .get(key)
            .or_else(|| self.inherited.get(key))
            .map(String::as_str)
    }

    /// Look up a variable, treating an empty value as unset.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// Parse a port variable; `Ok(None)` when unset.
    pub fn port(&self, key: &str) -> Result<Option<u16>> {
        match self.get_non_empty(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map(Some)
                .map_err(|_| Error::validation(format!("Invalid {}: {}", key, raw))),
        }
    }

    /// Entries that came from `.env`. Children inherit the real environment
    /// on their own, so only this layer has to be passed explicitly.
    pub fn dotenv_vars(&self) -> &BTreeMap<String, String> {
        &self.dotenv
    }

    pub fn dotenv_path(&self) -> Option<&Path> {
        self.dotenv_path.as_deref()
    }
}

/// Non-fatal environment checks. Returns one message per issue found.
///
/// `credentials_path` is the path the children will be told to use, after
/// credential resolution.
pub fn validate_environment(env: &EnvSnapshot, credentials_path: Option<&Path>) -> Vec<String> {
    let mut issues = Vec::new();

    if env.get_non_empty(ENV_STORAGE_BUCKET).is_none() {
        issues.push(format!("{} not set", ENV_STORAGE_BUCKET));
    }

    if env.get_non_empty(ENV_CLOUD_PROJECT).is_none() {
        issues.push(format!("{} not set", ENV_CLOUD_PROJECT));
    }

    if let Some(path) = credentials_path {
        if let Some(issue) = check_credentials_file(path) {
            issues.push(issue);
        }
    }

    if let Err(e) = env.port(ENV_MCP_HTTP_PORT) {
        issues.push(e.to_string());
    }

    issues
}

fn check_credentials_file(path: &Path) -> Option<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Some(format!("Credentials file not found: {}", path.display()));
        }
        Err(e) => {
            return Some(format!("Error reading credentials file {}: {}", path.display(), e));
        }
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) if map.contains_key("project_id") => None,
        Ok(_) => Some(format!("Credentials file missing project_id: {}", path.display())),
        Err(_) => Some(format!("Credentials file is not valid JSON: {}", path.display())),
    }
}
