use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tandem_monitoring::StatusTracker;
use tandem_supervisor::{
    resolve_credentials, status_server, validate_environment, EnvSnapshot, ManagedProcess,
    Supervisor, SupervisorConfig, SupervisorSettings, DOTENV_CANDIDATES, VERSION,
};

/// Tandem - supervise an ordered set of long-running processes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML). Without it the default layout is
    /// built from the environment.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Port for the status endpoint (overrides config and HEALTH_PORT)
    #[arg(short = 'p', long)]
    status_port: Option<u16>,

    /// Explicit .env file (skips the default search)
    #[arg(long, value_name = "FILE")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let file_config = args
        .config
        .as_ref()
        .map(SupervisorConfig::load_from_file)
        .transpose()?;

    // Initialize logging
    let level = if args.debug {
        "debug"
    } else {
        file_config
            .as_ref()
            .map_or("info", |c| c.supervisor.log_level.as_str())
    };
    initialize_logging(level)?;

    info!("Starting tandem supervisor v{}", VERSION);
    if let Some(path) = &args.config {
        info!("Config file: {}", path.display());
    }

    let env = load_environment(args.env_file.as_ref())?;

    let mut config = match file_config {
        Some(mut config) => {
            config.apply_environment(&env)?;
            config
        }
        None => {
            info!("No config file given, using default process layout");
            SupervisorConfig::from_env(&env)?
        }
    };

    // Override status port if specified
    if let Some(port) = args.status_port {
        config.supervisor.status_port = Some(port);
    }
    config.validate()?;

    let processes: Vec<ManagedProcess> = config
        .enabled_processes()
        .into_iter()
        .map(ManagedProcess::from)
        .collect();
    info!("Loaded configuration for {} processes", processes.len());

    let credentials = resolve_credentials(&config.credentials, &env);
    info!("Credentials source: {}", credentials.source);

    let mut shared_env = env.dotenv_vars().clone();
    shared_env.extend(credentials.exports.clone());

    let tracker = StatusTracker::new();
    let shutdown = CancellationToken::new();

    // Handlers must be in place before the first child is spawned.
    let signals = ShutdownSignals::install()?;
    tokio::spawn(forward_shutdown_signals(signals, shutdown.clone()));

    let mut supervisor = Supervisor::new(SupervisorSettings::from(&config.supervisor))
        .with_shared_env(shared_env)
        .with_status_tracker(tracker.clone())
        .with_shutdown_token(shutdown.clone());

    for issue in validate_environment(&env, credentials.path.as_deref()) {
        supervisor.report_issue(format!("Environment: {}", issue));
    }
    if credentials.is_missing() {
        supervisor.report_issue("No service-account credentials found");
    }

    let server_stop = CancellationToken::new();
    let server = config
        .supervisor
        .status_port
        .map(|port| spawn_status_server(port, tracker, server_stop.clone()));

    let code = match supervisor.launch(processes).await {
        Ok(()) => supervisor.wait().await.exit_code,
        Err(e) => {
            error!("Failed to launch processes: {}", e);
            supervisor.shutdown().await;
            1
        }
    };

    server_stop.cancel();
    if let Some(server) = server {
        let _ = server.await;
    }

    info!("Tandem supervisor exiting with code {}", code);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn initialize_logging(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    Ok(())
}

/// Capture the environment once, layered with the `.env` file if any.
fn load_environment(env_file: Option<&PathBuf>) -> Result<EnvSnapshot> {
    let snapshot = EnvSnapshot::capture();
    let snapshot = match env_file {
        Some(path) => snapshot.with_dotenv_file(path)?,
        None => snapshot.with_first_dotenv(DOTENV_CANDIDATES)?,
    };
    Ok(snapshot)
}

fn spawn_status_server(
    port: u16,
    tracker: StatusTracker,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = status_server::serve(port, tracker, stop).await {
            error!("Status server error: {:#}", e);
        }
    })
}

/// SIGTERM and SIGINT streams, registered up front so a signal that arrives
/// while children are being spawned is never handled by the default action.
struct ShutdownSignals {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    fn install() -> Result<Self> {
        use anyhow::Context;
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
        })
    }

    #[cfg(not(unix))]
    fn install() -> Result<Self> {
        Ok(Self {})
    }

    /// Next shutdown signal, by name.
    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        "Ctrl+C"
    }
}

/// Cancel `shutdown` on the first signal. Later signals are only logged.
async fn forward_shutdown_signals(mut signals: ShutdownSignals, shutdown: CancellationToken) {
    loop {
        let name = signals.recv().await;

        if shutdown.is_cancelled() {
            warn!("Received {} during shutdown, ignoring", name);
        } else {
            info!("Received {} signal", name);
            shutdown.cancel();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_cancels_shutdown_token() {
        let signals = ShutdownSignals::install().unwrap();
        let shutdown = CancellationToken::new();

        // Delivered before the forwarding task has run: the registered
        // handler must hold it rather than terminate the test process.
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::spawn(forward_shutdown_signals(signals, shutdown.clone()));
        tokio::time::timeout(Duration::from_secs(5), shutdown.cancelled())
            .await
            .expect("SIGTERM did not cancel the shutdown token");
    }
}
