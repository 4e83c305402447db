//! # Tandem Process
//!
//! Low-level process operations used by the supervisor.
//!
//! This crate provides primitives for:
//! - Spawning a child with a layered environment
//! - Graceful termination and force kill by PID
//! - Process existence checks
//! - Mapping an exit status onto a conventional exit code

pub mod check;
pub mod execute;
pub mod exit;
pub mod terminate;

// Re-export main types
pub use check::*;
pub use execute::*;
pub use exit::*;
pub use terminate::*;
