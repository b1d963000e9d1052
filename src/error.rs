//! Error types for `examwarden`
//!
//! Three layers: [`ExamError`] is the typed result surface handed to the
//! embedding application, [`PortError`] describes collaborator failures, and
//! [`ExamwardenError`] aggregates everything for the CLI and maps it onto
//! process exit codes.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `examwarden` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Session error (conflict, unknown session, collaborator failure)
    pub const SESSION_ERROR: i32 = 5;

    /// The session ended in disqualification
    pub const DISQUALIFIED: i32 = 6;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `examwarden` operations.
#[derive(Debug, Error)]
pub enum ExamwardenError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Session-level error surfaced by the runtime
    #[error(transparent)]
    Exam(#[from] ExamError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ExamwardenError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Exam(ExamError::PolicyViolation { .. }) => ExitCode::DISQUALIFIED,
            Self::Exam(_) => ExitCode::SESSION_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Session Errors
// ============================================================================

/// Errors returned to callers of the session runtime.
///
/// Validation and conflict errors are ordinary values so a surrounding UI can
/// react to them; none of these variants indicate a crashed runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExamError {
    /// Malformed item id or answer shape
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// Unknown session or item
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind (`"session"`, `"item"`, `"assessment"`)
        kind: &'static str,
        /// The identifier that was looked up
        id: String,
    },

    /// Mutation attempted on a completed session
    #[error("session {session_id} is already completed")]
    Conflict {
        /// The completed session
        session_id: String,
    },

    /// A collaborator call failed but may succeed on retry
    #[error("transient I/O failure in {operation}: {message}")]
    TransientIo {
        /// Collaborator operation that failed
        operation: &'static str,
        /// Last error reported by the collaborator
        message: String,
    },

    /// The session was terminated by an integrity breach
    #[error("session {session_id} disqualified after {violation_count} violation(s)")]
    PolicyViolation {
        /// The disqualified session
        session_id: String,
        /// Violation count at the time of disqualification
        violation_count: u32,
    },
}

impl ExamError {
    /// Shorthand for [`ExamError::Validation`].
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for an unknown session.
    #[must_use]
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "session",
            id: id.into(),
        }
    }

    /// Shorthand for an unknown item.
    #[must_use]
    pub fn item_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "item",
            id: id.into(),
        }
    }

    /// Shorthand for [`ExamError::Conflict`].
    #[must_use]
    pub fn conflict(session_id: impl Into<String>) -> Self {
        Self::Conflict {
            session_id: session_id.into(),
        }
    }

    /// Stable machine-readable code for wire responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::TransientIo { .. } => "transient_io",
            Self::PolicyViolation { .. } => "policy_violation",
        }
    }
}

// ============================================================================
// Collaborator Errors
// ============================================================================

/// Failure reported by an external collaborator (item repository, session
/// registry, activity log, key-value store).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    /// The call failed in a way that may succeed on retry
    #[error("transient failure: {0}")]
    Transient(String),

    /// The addressed record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The collaborator refused the request permanently
    #[error("rejected: {0}")]
    Rejected(String),
}

impl PortError {
    /// Whether a retry could change the outcome.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<std::io::Error> for PortError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::Transient(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for PortError {
    fn from(err: serde_json::Error) -> Self {
        Self::Rejected(format!("malformed record: {err}"))
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set (referenced at {location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Location in the configuration where it was referenced
        location: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "assessment.phases[2].items")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Validation failure that prevents the assessment from being used
    Error,
    /// Potential issue that does not prevent loading
    Warning,
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, ExamError>;
