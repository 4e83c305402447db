//! # Tandem Common
//!
//! Error types shared across the tandem workspace.
//!
//! Every other crate builds on these: configuration and validation failures
//! surface as [`Error`], while anything touching a child process surfaces as
//! [`ProcessError`].

pub mod errors;

// Re-export commonly used items
pub use errors::{Error, ProcessError, ProcessResult, Result, ResultExt};
