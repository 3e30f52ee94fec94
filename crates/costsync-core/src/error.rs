//! Error types for costsync-core
//!
//! Lower layers absorb not-found and partial failures into counters; only
//! failures after resource setup surface as `CoreError`.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for costsync operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // IO Errors
    // ===================
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    // ===================
    // Parse Errors
    // ===================
    #[error("Failed to (de)serialize {what}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    // ===================
    // Store Errors
    // ===================
    #[error("Database error during {operation}")]
    Database {
        operation: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Document store unavailable after {attempts} attempts: {reason}")]
    StoreUnavailable { attempts: u32, reason: String },

    #[error("Project id {id} already belongs to another project (not '{name}')")]
    ProjectIdConflict { id: String, name: String },

    // ===================
    // Broker Errors
    // ===================
    #[error("Broker request failed: {message}")]
    Broker {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    // ===================
    // Request Errors
    // ===================
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation timed out after {timeout_secs}s: {operation}")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },

    // ===================
    // Config Errors
    // ===================
    #[error("Failed to read config file: {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl CoreError {
    pub fn database(operation: impl Into<String>, source: rusqlite::Error) -> Self {
        CoreError::Database {
            operation: operation.into(),
            source,
        }
    }

    pub fn serialization(what: impl Into<String>, source: serde_json::Error) -> Self {
        CoreError::Serialization {
            what: what.into(),
            source,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        CoreError::InvalidInput {
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Severity level for issues collected during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Non-critical, the scan continues
    Warning,
    /// The file could not be used
    Error,
}

/// Individual issue entry in a report
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub source: String,
    pub message: String,
    pub severity: ErrorSeverity,
    /// Actionable suggestion for the operator (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn warning(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_severity(source, message, ErrorSeverity::Warning)
    }

    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_severity(source, message, ErrorSeverity::Error)
    }

    fn with_severity(
        source: impl Into<String>,
        message: impl Into<String>,
        severity: ErrorSeverity,
    ) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity,
            suggestion: None,
        }
    }

    /// Add an actionable suggestion to this issue
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Degraded state indicator for the running service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DegradedState {
    /// All dependencies reachable
    Healthy,
    /// Some dependencies missing but requests are still served
    Degraded { missing: Vec<String>, reason: String },
}

impl DegradedState {
    /// Derive the state from dependency reachability
    pub fn from_dependencies(store_connected: bool, producer_connected: bool) -> Self {
        let mut missing = Vec::new();
        if !store_connected {
            missing.push("document-store".to_string());
        }
        if !producer_connected {
            missing.push("message-producer".to_string());
        }

        if missing.is_empty() {
            return DegradedState::Healthy;
        }

        let reason = if store_connected {
            "cost updates are not published to the broker".to_string()
        } else {
            "reconciliation requests will fail until the store reconnects".to_string()
        };
        DegradedState::Degraded { missing, reason }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, DegradedState::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        !self.is_healthy()
    }
}
