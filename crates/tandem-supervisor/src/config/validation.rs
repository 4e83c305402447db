use super::*;
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};

/// Validate the complete configuration
pub fn validate_config(config: &SupervisorConfig) -> Result<()> {
    validate_supervisor_options(&config.supervisor)?;
    validate_credential_config(&config.credentials)?;
    validate_process_configs(&config.processes)?;
    validate_ports(config)?;

    Ok(())
}

/// Validate supervisor-wide options
fn validate_supervisor_options(options: &SupervisorOptions) -> Result<()> {
    if options.status_port == Some(0) {
        return Err(anyhow!("Status port must be between 1 and 65535, got: 0"));
    }

    if options.graceful_timeout.is_zero() {
        return Err(anyhow!("Graceful timeout must be greater than 0"));
    }

    if options.force_kill_timeout.is_zero() {
        return Err(anyhow!("Force kill timeout must be greater than 0"));
    }

    let readiness = &options.readiness;
    if readiness.max_attempts == 0 {
        return Err(anyhow!("Readiness max_attempts must be greater than 0"));
    }
    if readiness.attempt_timeout.is_zero() {
        return Err(anyhow!("Readiness attempt_timeout must be greater than 0"));
    }

    match options.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(anyhow!(
            "Invalid log level: {}, must be one of: trace, debug, info, warn, error",
            options.log_level
        )),
    }
}

fn validate_credential_config(credentials: &CredentialConfig) -> Result<()> {
    if credentials.secret_name.is_empty() || credentials.secret_file.is_empty() {
        return Err(anyhow!("Credential secret_name and secret_file cannot be empty"));
    }

    if credentials.export_vars.iter().any(|v| v.is_empty() || v.contains('=')) {
        return Err(anyhow!(
            "Credential export_vars must be non-empty variable names without '='"
        ));
    }

    Ok(())
}

/// Validate all process configurations
fn validate_process_configs(processes: &[ProcessConfig]) -> Result<()> {
    if !processes.iter().any(|p| p.enabled) {
        return Err(anyhow!("At least one enabled process must be configured"));
    }

    // Check for duplicate names
    let mut names = HashSet::new();
    for process in processes {
        if !names.insert(&process.name) {
            return Err(anyhow!("Duplicate process name: {}", process.name));
        }

        validate_process_config(process)?;
    }

    Ok(())
}

/// Validate a single process configuration
fn validate_process_config(process: &ProcessConfig) -> Result<()> {
    if process.name.is_empty() {
        return Err(anyhow!("Process name cannot be empty"));
    }

    if process.name.len() > 64 {
        return Err(anyhow!("Process name too long (max 64 characters): {}", process.name));
    }

    if !process.name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(anyhow!(
            "Process name can only contain alphanumeric characters, hyphens, and underscores: {}",
            process.name
        ));
    }

    match process.command.first() {
        None => return Err(anyhow!("Command cannot be empty for process: {}", process.name)),
        Some(executable) if executable.trim().is_empty() => {
            return Err(anyhow!("Executable cannot be empty for process: {}", process.name));
        }
        Some(_) => {}
    }

    if let Some(key) = process.env.keys().find(|k| k.is_empty() || k.contains('=')) {
        return Err(anyhow!(
            "Invalid environment variable name '{}' for process: {}",
            key,
            process.name
        ));
    }

    if let Some(path) = &process.health_path {
        if process.listen_port.is_none() {
            return Err(anyhow!(
                "health_path requires listen_port for process: {}",
                process.name
            ));
        }
        if !path.starts_with('/') {
            return Err(anyhow!(
                "health_path must start with '/' for process {}: {}",
                process.name,
                path
            ));
        }
    }

    if process.health_path.is_some() && process.startup_delay.is_some() {
        return Err(anyhow!(
            "health_path and startup_delay are mutually exclusive for process: {}",
            process.name
        ));
    }

    Ok(())
}

/// Ports of enabled processes and the status port must be mutually distinct.
fn validate_ports(config: &SupervisorConfig) -> Result<()> {
    let mut owners: HashMap<u16, &str> = HashMap::new();

    if let Some(port) = config.supervisor.status_port {
        owners.insert(port, "status server");
    }

    for process in config.enabled_processes() {
        let Some(port) = process.listen_port else {
            continue;
        };

        if port == 0 {
            return Err(anyhow!("Port must be between 1 and 65535 for process: {}", process.name));
        }

        if let Some(owner) = owners.insert(port, &process.name) {
            return Err(anyhow!(
                "Port {} is assigned to both {} and {}",
                port,
                owner,
                process.name
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SupervisorConfig {
        let mut mcp = ProcessConfig::new("mcp", vec!["node".to_string(), "server.js".to_string()]);
        mcp.listen_port = Some(3000);
        mcp.health_path = Some("/health".to_string());

        let mut coordinator = ProcessConfig::new("coordinator", vec!["python".to_string()]);
        coordinator.listen_port = Some(8080);

        SupervisorConfig {
            supervisor: SupervisorOptions::default(),
            credentials: CredentialConfig::default(),
            processes: vec![mcp, coordinator],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_duplicate_names() {
        let mut config = base_config();
        config.processes[1].name = "mcp".to_string();
        config.processes[1].listen_port = Some(8081);

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate process name"));
    }

    #[test]
    fn test_unsafe_name() {
        let mut config = base_config();
        config.processes[0].name = "mcp server".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_command() {
        let mut config = base_config();
        config.processes[1].command.clear();

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Command cannot be empty"));
    }

    #[test]
    fn test_health_path_requires_port() {
        let mut config = base_config();
        config.processes[0].listen_port = None;

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("requires listen_port"));
    }

    #[test]
    fn test_health_path_requires_leading_slash() {
        let mut config = base_config();
        config.processes[0].health_path = Some("health".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_health_path_excludes_startup_delay() {
        let mut config = base_config();
        config.processes[0].startup_delay = Some(Duration::from_secs(5));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_port_collision_between_processes() {
        let mut config = base_config();
        config.processes[1].listen_port = Some(3000);

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Port 3000"));
    }

    #[test]
    fn test_port_collision_with_status_server() {
        let mut config = base_config();
        config.supervisor.status_port = Some(8080);

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("status server"));
    }

    #[test]
    fn test_disabled_process_port_is_ignored() {
        let mut config = base_config();
        config.processes[1].listen_port = Some(3000);
        config.processes[1].enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_no_enabled_processes() {
        let mut config = base_config();
        for process in &mut config.processes {
            process.enabled = false;
        }
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = base_config();
        config.supervisor.log_level = "verbose".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_readiness_attempts() {
        let mut config = base_config();
        config.supervisor.readiness.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_export_var() {
        let mut config = base_config();
        config.credentials.export_vars.push("BAD=NAME".to_string());
        assert!(validate_config(&config).is_err());
    }
}
