use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{anyhow, Context, Result};

use tandem_monitoring::ReadinessPolicy;

use crate::environment::{
    EnvSnapshot, ENV_COORDINATOR_COMMAND, ENV_CREDENTIALS_PATH, ENV_FIREBASE_MCP_COMMAND,
    ENV_HEALTH_PORT, ENV_MCP_HTTP_PORT, ENV_MCP_TRANSPORT, ENV_PORT, ENV_SECRETS_DIR,
    ENV_SERVICE_ACCOUNT_KEY_PATH,
};

pub mod validation;

pub const DEFAULT_MCP_PORT: u16 = 3000;
pub const DEFAULT_COORDINATOR_PORT: u16 = 8080;
pub const DEFAULT_MCP_TRANSPORT: &str = "http";
pub const DEFAULT_FIREBASE_MCP_COMMAND: &str = "npx -y @gannonh/firebase-mcp";
pub const DEFAULT_COORDINATOR_COMMAND: &str = "python -m coordinator";

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub supervisor: SupervisorOptions,
    #[serde(default)]
    pub credentials: CredentialConfig,
    pub processes: Vec<ProcessConfig>,
}

/// Supervisor-wide options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorOptions {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Port for the supervisor's own status endpoint (disabled when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_port: Option<u16>,

    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_graceful_timeout", with = "duration_serde")]
    pub graceful_timeout: Duration,

    /// How long to wait for exit after SIGKILL
    #[serde(default = "default_force_kill_timeout", with = "duration_serde")]
    pub force_kill_timeout: Duration,

    #[serde(default)]
    pub readiness: ReadinessConfig,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            status_port: None,
            graceful_timeout: default_graceful_timeout(),
            force_kill_timeout: default_force_kill_timeout(),
            readiness: ReadinessConfig::default(),
        }
    }
}

/// Readiness polling options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessConfig {
    #[serde(default = "default_readiness_interval", with = "duration_serde")]
    pub interval: Duration,
    #[serde(default = "default_readiness_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_readiness_timeout", with = "duration_serde")]
    pub attempt_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval: default_readiness_interval(),
            max_attempts: default_readiness_attempts(),
            attempt_timeout: default_readiness_timeout(),
        }
    }
}

impl From<ReadinessConfig> for ReadinessPolicy {
    fn from(config: ReadinessConfig) -> Self {
        ReadinessPolicy {
            interval: config.interval,
            max_attempts: config.max_attempts,
            attempt_timeout: config.attempt_timeout,
        }
    }
}

/// Where service-account credentials come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialConfig {
    /// Root of the mounted secrets volume (one subdirectory per secret)
    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: PathBuf,
    #[serde(default = "default_secret_name")]
    pub secret_name: String,
    #[serde(default = "default_secret_file")]
    pub secret_file: String,
    /// Where a mounted secret is copied before children see it
    #[serde(default = "default_runtime_path")]
    pub runtime_path: PathBuf,
    /// Local files tried in order when no secret is mounted
    #[serde(default = "default_fallback_paths")]
    pub fallback_paths: Vec<PathBuf>,
    /// Variables pointed at the resolved file
    #[serde(default = "default_export_vars")]
    pub export_vars: Vec<String>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            secrets_dir: default_secrets_dir(),
            secret_name: default_secret_name(),
            secret_file: default_secret_file(),
            runtime_path: default_runtime_path(),
            fallback_paths: default_fallback_paths(),
            export_vars: default_export_vars(),
        }
    }
}

impl CredentialConfig {
    /// Path of the mounted secret file.
    pub fn mounted_secret_path(&self) -> PathBuf {
        self.secrets_dir.join(&self.secret_name).join(&self.secret_file)
    }
}

/// Individual process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessConfig {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
    /// Grace delay after launch for processes without a health path
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_serde"
    )]
    pub startup_delay: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

impl ProcessConfig {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            enabled: true,
            env: BTreeMap::new(),
            listen_port: None,
            health_path: None,
            startup_delay: None,
            working_directory: None,
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: SupervisorConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Build the standard two-process layout from the environment.
    ///
    /// The Firebase MCP server starts first and is gated on `/health`; the
    /// coordinator starts once the MCP server is ready.
    pub fn from_env(env: &EnvSnapshot) -> Result<Self> {
        let mcp_port = env.port(ENV_MCP_HTTP_PORT)?.unwrap_or(DEFAULT_MCP_PORT);
        let coordinator_port = env.port(ENV_PORT)?.unwrap_or(DEFAULT_COORDINATOR_PORT);
        let transport = env
            .get_non_empty(ENV_MCP_TRANSPORT)
            .unwrap_or(DEFAULT_MCP_TRANSPORT);

        let mut mcp = ProcessConfig::new(
            "firebase-mcp",
            split_command(
                env.get_non_empty(ENV_FIREBASE_MCP_COMMAND)
                    .unwrap_or(DEFAULT_FIREBASE_MCP_COMMAND),
            )?,
        );
        mcp.env.insert(ENV_MCP_TRANSPORT.to_string(), transport.to_string());
        mcp.env.insert(ENV_MCP_HTTP_PORT.to_string(), mcp_port.to_string());
        mcp.listen_port = Some(mcp_port);
        mcp.health_path = Some("/health".to_string());

        let mut coordinator = ProcessConfig::new(
            "coordinator",
            split_command(
                env.get_non_empty(ENV_COORDINATOR_COMMAND)
                    .unwrap_or(DEFAULT_COORDINATOR_COMMAND),
            )?,
        );
        coordinator.env.insert(ENV_PORT.to_string(), coordinator_port.to_string());
        coordinator.env.insert(ENV_MCP_HTTP_PORT.to_string(), mcp_port.to_string());
        coordinator.listen_port = Some(coordinator_port);

        let mut config = SupervisorConfig {
            supervisor: SupervisorOptions::default(),
            credentials: CredentialConfig::default(),
            processes: vec![mcp, coordinator],
        };
        config.apply_environment(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Fill settings the environment may provide and the file left unset.
    pub fn apply_environment(&mut self, env: &EnvSnapshot) -> Result<()> {
        if self.supervisor.status_port.is_none() {
            self.supervisor.status_port = env.port(ENV_HEALTH_PORT)?;
        }

        if let Some(dir) = env.get_non_empty(ENV_SECRETS_DIR) {
            self.credentials.secrets_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Get enabled processes only, in launch order
    pub fn enabled_processes(&self) -> Vec<&ProcessConfig> {
        self.processes.iter().filter(|p| p.enabled).collect()
    }
}

/// Split a command line using shell quoting rules.
pub fn split_command(command: &str) -> Result<Vec<String>> {
    let parts = shell_words::split(command)
        .map_err(|e| anyhow!("Failed to parse command '{}': {}", command, e))?;

    if parts.is_empty() {
        return Err(anyhow!("Command cannot be empty"));
    }

    Ok(parts)
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_graceful_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_force_kill_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_readiness_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_readiness_attempts() -> u32 {
    30
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_enabled() -> bool {
    true
}

fn default_secrets_dir() -> PathBuf {
    PathBuf::from("/secrets")
}

fn default_secret_name() -> String {
    "firebase-service-account".to_string()
}

fn default_secret_file() -> String {
    "key.json".to_string()
}

fn default_runtime_path() -> PathBuf {
    PathBuf::from("/tmp/credentials/service-account.json")
}

fn default_fallback_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/app/service-account.json"),
        PathBuf::from("/app/credentials/service-account.json"),
        PathBuf::from("./service-account.json"),
    ]
}

fn default_export_vars() -> Vec<String> {
    vec![
        ENV_CREDENTIALS_PATH.to_string(),
        ENV_SERVICE_ACCOUNT_KEY_PATH.to_string(),
    ]
}

// Custom serialization for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // Check for "ms" BEFORE "s" since "ms" ends with 's'
        if let Some(num_str) = s.strip_suffix("ms") {
            let millis: u64 = num_str.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num_str) = s.strip_suffix('s') {
            let secs: u64 = num_str.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num_str) = s.strip_suffix('m') {
            let mins: u64 = num_str.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(mins * 60))
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }
}

// Custom serialization for Option<Duration>
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => super::duration_serde::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => super::duration_serde::parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
