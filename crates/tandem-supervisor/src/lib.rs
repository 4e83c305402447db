//! # Tandem Supervisor
//!
//! Supervises an ordered list of long-running child processes.
//!
//! This crate provides:
//! - Supervisor - ordered launch, readiness gating, first-exit wait, shutdown
//! - Configuration (YAML file or environment-derived default layout)
//! - Environment snapshot, `.env` loading and validation
//! - Service-account credential resolution
//! - The supervisor's own HTTP status endpoint

pub mod config;
pub mod credentials;
pub mod environment;
pub mod process;
pub mod state;
pub mod status_server;
pub mod supervisor;

// Re-export main types
pub use config::{CredentialConfig, ProcessConfig, ReadinessConfig, SupervisorConfig, SupervisorOptions};
pub use credentials::{resolve_credentials, CredentialSource, ResolvedCredentials};
pub use environment::{validate_environment, EnvSnapshot, DOTENV_CANDIDATES};
pub use process::{ExitEvent, ManagedProcess};
pub use state::{PhaseMachine, SupervisorPhase};
pub use supervisor::{ExitCause, ShutdownReport, Supervisor, SupervisorExit, SupervisorSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
