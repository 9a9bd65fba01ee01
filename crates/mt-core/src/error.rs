//! Core error types for mqterm

use std::path::PathBuf;
use thiserror::Error;

/// Failure to bring up a shell on a pseudo-terminal
#[derive(Error, Debug)]
pub enum SpawnError {
    /// Opening the PTY pair failed
    #[error("PTY allocation failed: {0}")]
    PtyAllocation(String),

    /// The shell process could not be started
    #[error("Failed to spawn shell '{shell}': {reason}")]
    Process { shell: String, reason: String },

    /// The PTY master did not hand out a reader or writer
    #[error("PTY I/O handle unavailable: {0}")]
    Handle(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Broker address could not be used
    #[error("Invalid broker address '{address}': {reason}")]
    Broker { address: String, reason: String },
}
