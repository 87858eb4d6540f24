//! Crate-level error types.

use thiserror::Error;

/// Errors surfaced by gridsink's own machinery (configuration, lifecycle).
///
/// Backend delivery failures never appear here: they are absorbed by the
/// operation queue and reported through metrics and status snapshots only.
#[derive(Debug, Error)]
pub enum GridsinkError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, GridsinkError>;
