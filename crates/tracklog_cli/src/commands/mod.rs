//! CLI command implementations.

pub mod config;
pub mod inspect;
pub mod token;

use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The server configuration was refused.
    #[error("configuration error: {0}")]
    Config(#[from] tracklog_server::ConfigError),

    /// A token failed verification.
    #[error("token rejected: {0}")]
    Token(#[from] tracklog_server::AuthError),

    /// A user id argument is invalid.
    #[error("{0}")]
    Core(#[from] tracklog_core::CoreError),

    /// The data directory could not be read.
    #[error("storage error: {0}")]
    Storage(#[from] tracklog_storage::StorageError),

    /// Output could not be encoded.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    /// A command-line argument is out of range.
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument {
        /// Argument name.
        name: &'static str,
        /// Why it was refused.
        reason: String,
    },

    /// No data directory at the given path.
    #[error("no data directory found at {0}")]
    MissingDataDir(String),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format shared by commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

pub(crate) fn format_millis(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map_or_else(|| ms.to_string(), |t| t.to_rfc3339())
}
