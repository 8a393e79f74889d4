//! CLI command implementations.

pub mod client;
pub mod output;
pub mod server;

use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// A `--set` argument was not `KEY=VALUE`.
    #[error("expected KEY=VALUE, got {0:?}")]
    InvalidAssignment(String),

    /// Unknown `--format`.
    #[error("unknown output format {0:?} (expected text or json)")]
    InvalidFormat(String),
}
