//! Error types for the sql-runner core library.
//!
//! `RunnerError` covers every failure that aborts an operation outright:
//! loading a playbook, reading a SQL source, expanding a template, building
//! a backend client, handling the lock file or loading configuration.
//! Failures that belong to a single target or query are not `RunnerError`s;
//! they are recorded as values on the status records (see
//! [`crate::models::TargetError`] and [`crate::models::QueryStatus`]).
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Playbook | Reading, cleaning and parsing playbooks |
//! | E2001-E2099 | SQL source | Resolving and reading SQL scripts |
//! | E3001-E3099 | Template | Parsing and expanding templates, helpers |
//! | E4001-E4099 | Backend | Client construction and connection |
//! | E5001-E5099 | Lock | Lock file / lock key handling |
//! | E6001-E6099 | Config | Flags, config files and environment |
//! | E9001-E9099 | General | Internal, IO, HTTP and serialization errors |

use thiserror::Error;
use tracing::{error, warn};

/// The main error type for the sql-runner core library.
#[derive(Debug, Error)]
pub enum RunnerError {
    // ========================================================================
    // Playbook Errors (E1001-E1099)
    // ========================================================================
    /// The playbook could not be read from its source
    #[error("[E1001] Failed to read playbook '{path}': {message}")]
    PlaybookReadFailed { path: String, message: String },

    /// The playbook document is not valid YAML for the playbook schema
    #[error("[E1002] Failed to parse playbook: {0}")]
    PlaybookParseFailed(String),

    // ========================================================================
    // SQL Source Errors (E2001-E2099)
    // ========================================================================
    /// A SQL script could not be read
    #[error("[E2001] An error occurred loading the SQL file: {path}: {message}")]
    SqlReadFailed { path: String, message: String },

    /// A Consul key has no value
    #[error("[E2002] The key '{0}' returned a nil value from the consul server")]
    ConsulKeyNotFound(String),

    /// The Consul server answered with an unexpected status
    #[error("[E2003] Consul request for '{key}' failed with status {status}")]
    ConsulRequestFailed { key: String, status: u16 },

    // ========================================================================
    // Template Errors (E3001-E3099)
    // ========================================================================
    /// The template text could not be parsed
    #[error("[E3001] template: {name}:{line}: {message}")]
    TemplateParse {
        name: String,
        line: usize,
        message: String,
    },

    /// A helper was called that the registry does not know about
    #[error("[E3002] template: {name}: function \"{function}\" not defined")]
    UnknownHelper { name: String, function: String },

    /// A helper was called with the wrong arguments
    #[error("[E3003] template: {function}: {message}")]
    HelperArguments { function: String, message: String },

    /// A helper ran but failed
    #[error("[E3004] template: error calling {function}: {message}")]
    HelperFailed { function: String, message: String },

    /// AWS credentials could not be resolved by a credential helper
    #[error("[E3005] {provider}: {message}")]
    CredentialsNotFound { provider: String, message: String },

    // ========================================================================
    // Backend Errors (E4001-E4099)
    // ========================================================================
    /// The backend type has no registered client
    #[error("[E4001] Database type is unsupported: {0}")]
    UnsupportedBackend(String),

    /// The backend client could not be built from the target parameters
    #[error("[E4002] Invalid connection parameter '{parameter}' for target '{target}': {message}")]
    InvalidConnectionParameter {
        target: String,
        parameter: String,
        message: String,
    },

    /// Connecting to the target failed
    #[error("[E4003] Failed to connect to target '{target}': {message}")]
    ConnectionFailed { target: String, message: String },

    /// A statement failed on the backend
    #[error("[E4004] Query failed: {0}")]
    QueryFailed(String),

    /// A statement did not finish within the read timeout
    #[error("[E4005] Query timed out after {0} seconds")]
    QueryTimeout(u64),

    // ========================================================================
    // Lock Errors (E5001-E5099)
    // ========================================================================
    /// A lock already exists, a previous run failed or is ongoing
    #[error("[E5001] {0} found on start, previous run failed or is ongoing. Cannot start")]
    LockExists(String),

    /// The lock is already held by this process
    #[error("[E5002] LockFile is already locked!")]
    AlreadyLocked,

    /// The directory for a local lock file does not exist
    #[error("[E5003] directory for key does not exist: {0}")]
    LockDirectoryMissing(String),

    // ========================================================================
    // Configuration Errors (E6001-E6099)
    // ========================================================================
    /// A flag combination is not allowed
    #[error("[E6001] {0}")]
    InvalidOptions(String),

    /// Configuration file parse error
    #[error("[E6002] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// Invalid configuration value
    #[error("[E6003] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// Internal error (catch-all for unexpected conditions)
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("[E9002] IO error: {0}")]
    IoError(String),

    /// HTTP transport error
    #[error("[E9003] HTTP request failed: {0}")]
    HttpError(String),

    /// Serialization/deserialization error
    #[error("[E9004] Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for sql-runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

// ============================================================================
// From trait implementations for seamless error propagation
// ============================================================================

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::IoError(err.to_string())
    }
}

impl From<serde_yaml::Error> for RunnerError {
    fn from(err: serde_yaml::Error) -> Self {
        RunnerError::PlaybookParseFailed(err.to_string())
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        RunnerError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for RunnerError {
    fn from(err: reqwest::Error) -> Self {
        RunnerError::HttpError(err.to_string())
    }
}

impl From<sqlx::Error> for RunnerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Configuration(_) => RunnerError::InvalidConfigValue {
                key: "connection".to_string(),
                message: err.to_string(),
            },
            sqlx::Error::Database(db_err) => RunnerError::QueryFailed(db_err.to_string()),
            _ => RunnerError::QueryFailed(err.to_string()),
        }
    }
}

impl From<config::ConfigError> for RunnerError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => RunnerError::InvalidConfigValue {
                key,
                message: "Key not found".to_string(),
            },
            config::ConfigError::FileParse { uri, cause } => RunnerError::ConfigParseError(
                format!("Failed to parse {}: {}", uri.unwrap_or_default(), cause),
            ),
            config::ConfigError::Type {
                origin,
                unexpected,
                expected,
                key,
            } => RunnerError::InvalidConfigValue {
                key: key.unwrap_or_else(|| origin.map(|o| o.to_string()).unwrap_or_default()),
                message: format!("Expected {}, got {}", expected, unexpected),
            },
            _ => RunnerError::ConfigParseError(err.to_string()),
        }
    }
}

// ============================================================================
// Error categorization helpers
// ============================================================================

impl RunnerError {
    /// Returns true if this error comes from loading or parsing a playbook.
    pub fn is_playbook_error(&self) -> bool {
        matches!(
            self,
            RunnerError::PlaybookReadFailed { .. }
                | RunnerError::PlaybookParseFailed(_)
        )
    }

    /// Returns true if this error comes from template expansion.
    pub fn is_template_error(&self) -> bool {
        matches!(
            self,
            RunnerError::TemplateParse { .. }
                | RunnerError::UnknownHelper { .. }
                | RunnerError::HelperArguments { .. }
                | RunnerError::HelperFailed { .. }
                | RunnerError::CredentialsNotFound { .. }
        )
    }

    /// Returns true if this error is about the lock file.
    pub fn is_lock_error(&self) -> bool {
        matches!(
            self,
            RunnerError::LockExists(_)
                | RunnerError::AlreadyLocked
                | RunnerError::LockDirectoryMissing(_)
        )
    }

    /// Returns true if this error comes from the flags or the configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RunnerError::InvalidOptions(_)
                | RunnerError::ConfigParseError(_)
                | RunnerError::InvalidConfigValue { .. }
        )
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            RunnerError::PlaybookReadFailed { .. } => "E1001",
            RunnerError::PlaybookParseFailed(_) => "E1002",
            RunnerError::SqlReadFailed { .. } => "E2001",
            RunnerError::ConsulKeyNotFound(_) => "E2002",
            RunnerError::ConsulRequestFailed { .. } => "E2003",
            RunnerError::TemplateParse { .. } => "E3001",
            RunnerError::UnknownHelper { .. } => "E3002",
            RunnerError::HelperArguments { .. } => "E3003",
            RunnerError::HelperFailed { .. } => "E3004",
            RunnerError::CredentialsNotFound { .. } => "E3005",
            RunnerError::UnsupportedBackend(_) => "E4001",
            RunnerError::InvalidConnectionParameter { .. } => "E4002",
            RunnerError::ConnectionFailed { .. } => "E4003",
            RunnerError::QueryFailed(_) => "E4004",
            RunnerError::QueryTimeout(_) => "E4005",
            RunnerError::LockExists(_) => "E5001",
            RunnerError::AlreadyLocked => "E5002",
            RunnerError::LockDirectoryMissing(_) => "E5003",
            RunnerError::InvalidOptions(_) => "E6001",
            RunnerError::ConfigParseError(_) => "E6002",
            RunnerError::InvalidConfigValue { .. } => "E6003",
            RunnerError::Internal(_) => "E9001",
            RunnerError::IoError(_) => "E9002",
            RunnerError::HttpError(_) => "E9003",
            RunnerError::SerializationError(_) => "E9004",
        }
    }

    /// Returns a user-friendly suggestion for how to resolve this error.
    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            RunnerError::PlaybookReadFailed { .. } => {
                Some("Check the --playbook path (or the Consul key when using --consul)")
            }
            RunnerError::SqlReadFailed { .. } => {
                Some("Check --sqlroot and the 'file' entries of the playbook queries")
            }
            RunnerError::UnknownHelper { .. } => Some(
                "Available helpers: nowWithFormat, systemEnv, randomInt, awsEnvCredentials, \
                 awsProfileCredentials, awsEC2RoleCredentials, awsChainCredentials",
            ),
            RunnerError::LockExists(_) => {
                Some("Inspect the previous run, then remove the lock with --delete-lock")
            }
            RunnerError::CredentialsNotFound { provider, .. } if provider.starts_with("Google") => {
                Some("Set GOOGLE_APPLICATION_CREDENTIALS or run 'gcloud auth application-default login'")
            }
            RunnerError::CredentialsNotFound { .. } => {
                Some("Set AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY or configure a shared profile")
            }
            _ => None,
        }
    }

    /// Coarse grouping used as a structured logging field.
    pub fn category(&self) -> &'static str {
        if self.is_playbook_error() {
            "playbook"
        } else if self.is_template_error() {
            "template"
        } else if self.is_lock_error() {
            "lock"
        } else if self.is_config_error() {
            "config"
        } else {
            match self.error_code().get(..2) {
                Some("E2") => "sql",
                Some("E4") => "backend",
                _ => "general",
            }
        }
    }

    /// Log this error with appropriate severity level.
    pub fn log(&self) {
        let code = self.error_code();
        let category = self.category();
        let suggestion = self.user_suggestion();

        if self.is_lock_error() {
            warn!(error_code = %code, category, suggestion = suggestion, "{}", self);
        } else {
            error!(error_code = %code, category, suggestion = suggestion, "{}", self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_messages() {
        let err = RunnerError::UnsupportedBackend("oracle".to_string());
        assert_eq!(err.error_code(), "E4001");
        assert_eq!(err.to_string(), "[E4001] Database type is unsupported: oracle");
    }

    #[test]
    fn test_error_categories() {
        assert!(RunnerError::PlaybookParseFailed("x".to_string()).is_playbook_error());
        assert!(RunnerError::AlreadyLocked.is_lock_error());
        assert!(RunnerError::InvalidOptions("x".to_string()).is_config_error());
        assert!(RunnerError::UnknownHelper {
            name: "q".to_string(),
            function: "f".to_string()
        }
        .is_template_error());
        assert!(!RunnerError::QueryTimeout(1).is_template_error());
    }

    #[test]
    fn test_category() {
        assert_eq!(RunnerError::PlaybookParseFailed("x".to_string()).category(), "playbook");
        assert_eq!(
            RunnerError::CredentialsNotFound {
                provider: "ProfileFile".to_string(),
                message: "x".to_string()
            }
            .category(),
            "template"
        );
        assert_eq!(RunnerError::AlreadyLocked.category(), "lock");
        assert_eq!(RunnerError::ConfigParseError("x".to_string()).category(), "config");
        assert_eq!(RunnerError::QueryFailed("x".to_string()).category(), "backend");
        assert_eq!(
            RunnerError::ConnectionFailed {
                target: "t".to_string(),
                message: "x".to_string()
            }
            .category(),
            "backend"
        );
        assert_eq!(RunnerError::SerializationError("x".to_string()).category(), "general");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RunnerError = io.into();
        assert!(matches!(err, RunnerError::IoError(_)));
        assert_eq!(err.error_code(), "E9002");
    }

    #[test]
    fn test_user_suggestion() {
        assert!(RunnerError::LockExists("a.lock".to_string())
            .user_suggestion()
            .is_some());
        assert!(RunnerError::Internal("x".to_string())
            .user_suggestion()
            .is_none());

        let google = RunnerError::CredentialsNotFound {
            provider: "GoogleComputeMetadata".to_string(),
            message: "x".to_string(),
        };
        assert!(google.user_suggestion().unwrap().contains("GOOGLE_APPLICATION_CREDENTIALS"));
    }
}
