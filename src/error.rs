//! Custom error types for mergegate.
//!
//! Only configuration-level failures and override submission failures are
//! surfaced as errors. Per-file and per-validator failures are recovered
//! locally and reported as findings, so they never appear here.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for mergegate operations
#[derive(Error, Debug)]
pub enum GateError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Override Errors
    // =========================================================================
    /// Override submission rejected
    #[error("Override rejected: {reason}")]
    Validation { reason: String },

    /// Persisted ledger failed integrity verification
    #[error("Override ledger corrupt at entry {sequence}: {reason}")]
    LedgerCorrupt { sequence: u64, reason: String },

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// ChangeSet could not be constructed
    #[error("Change set error: {message}")]
    ChangeSet { message: String },

    /// Git operation failed
    #[error("Git operation failed: {operation} - {message}")]
    Git { operation: String, message: String },

    /// External context provider unavailable or circuit open
    #[error("Context provider unavailable: {message}")]
    Unavailable { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML error wrapper
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GateError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error for a dotted field name
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an override validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a change set error
    pub fn changeset(message: impl Into<String>) -> Self {
        Self::ChangeSet {
            message: message.into(),
        }
    }

    /// Create a git error
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a provider-unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error comes from invalid configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::Toml(_)
        )
    }

    /// Check if this error is an override rejection
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Get error code for exit status
    ///
    /// `0` and `1` are reserved for the pass and fail verdicts.
    pub fn exit_code(&self) -> i32 {
        match self {
            _ if self.is_configuration() => 3,
            Self::Validation { .. } => 4,
            _ => 2,
        }
    }
}

/// Type alias for mergegate results
pub type Result<T> = std::result::Result<T, GateError>;
