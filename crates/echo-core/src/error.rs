//! Error types for echo operations.
//!
//! The scoring and selection hot paths never fail: "no signal" and "no asset"
//! are expressed as `None`. Errors are reserved for setup (configuration,
//! catalog loading) and for collaborators (delivery, config persistence).

use thiserror::Error;

/// Result type alias for echo operations.
pub type EchoResult<T> = Result<T, EchoError>;

/// Main error type for all echo operations.
#[derive(Error, Debug)]
pub enum EchoError {
    /// Configuration could not be loaded, parsed or saved.
    #[error("Configuration error: {message}")]
    Configuration { message: String, code: ErrorCode },

    /// Requested asset or session does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String, code: ErrorCode },

    /// Delivering an asset to a session failed.
    #[error("Delivery to '{session_id}' failed: {message}")]
    Delivery {
        session_id: String,
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Asset catalog could not be built.
    #[error("Catalog error: {message}")]
    Catalog { message: String, code: ErrorCode },

    /// Scheduler lifecycle failure.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Parse error.
    #[error("Parse error: {message}")]
    Parse { message: String, code: ErrorCode },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Configuration (CFG_xxx)
    CfgInvalidFormat,
    CfgUnsupportedFormat,
    CfgSaveFailed,

    // Assets (AST_xxx)
    AstNotFound,
    AstMissingFile,
    AstIndexCorrupted,

    // Delivery (DLV_xxx)
    DlvSendFailed,

    // Parse (PARSE_xxx)
    ParseInvalidTime,
    ParseInvalidValue,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CfgInvalidFormat => "CFG_001",
            ErrorCode::CfgUnsupportedFormat => "CFG_002",
            ErrorCode::CfgSaveFailed => "CFG_003",
            ErrorCode::AstNotFound => "AST_001",
            ErrorCode::AstMissingFile => "AST_002",
            ErrorCode::AstIndexCorrupted => "AST_003",
            ErrorCode::DlvSendFailed => "DLV_001",
            ErrorCode::ParseInvalidTime => "PARSE_001",
            ErrorCode::ParseInvalidValue => "PARSE_002",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl EchoError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            code: ErrorCode::CfgInvalidFormat,
        }
    }

    /// Create an asset not found error.
    pub fn not_found(asset_id: impl Into<String>) -> Self {
        Self::NotFound {
            message: format!("Asset '{}' not found", asset_id.into()),
            code: ErrorCode::AstNotFound,
        }
    }

    /// Create a delivery error for a single session.
    pub fn delivery(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            session_id: session_id.into(),
            message: message.into(),
            code: ErrorCode::DlvSendFailed,
            source: None,
        }
    }

    /// Create a catalog error for an unusable index.
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
            code: ErrorCode::AstIndexCorrupted,
        }
    }

    /// Create a catalog error for a missing voice directory.
    pub fn missing_directory(dir: &std::path::Path) -> Self {
        Self::Catalog {
            message: format!("Voice directory {} does not exist", dir.display()),
            code: ErrorCode::AstMissingFile,
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            code: ErrorCode::ParseInvalidValue,
        }
    }

    /// Create a parse error for a malformed `HH:MM` time.
    pub fn invalid_time(raw: &str) -> Self {
        Self::Parse {
            message: format!("'{}' is not a valid HH:MM time", raw),
            code: ErrorCode::ParseInvalidTime,
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration { code, .. } => *code,
            Self::NotFound { code, .. } => *code,
            Self::Delivery { code, .. } => *code,
            Self::Catalog { code, .. } => *code,
            Self::Parse { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Get a user-facing suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Configuration { .. } => Some("Check the config file syntax and extension (.toml, .json, .yaml)"),
            Self::NotFound { .. } => Some("Rescan the voice directory to refresh the catalog"),
            Self::Catalog { .. } => Some("Delete index.json to force a directory rescan"),
            Self::Delivery { .. } => Some("Check that the session id is still reachable"),
            Self::Parse { code: ErrorCode::ParseInvalidTime, .. } => Some("Use a 24-hour HH:MM time such as 08:00"),
            _ => None,
        }
    }

    /// Whether the failure only affects one recipient of a batch.
    pub fn is_per_recipient(&self) -> bool {
        matches!(self, Self::Delivery { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error() {
        let err = EchoError::configuration("bad toml");
        assert_eq!(err.code(), ErrorCode::CfgInvalidFormat);
        assert!(err.to_string().contains("bad toml"));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_delivery_error_is_per_recipient() {
        let err = EchoError::delivery("group:42", "socket closed");
        assert_eq!(err.code(), ErrorCode::DlvSendFailed);
        assert!(err.is_per_recipient());
        assert!(err.to_string().contains("group:42"));
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::CfgInvalidFormat.as_str(), "CFG_001");
        assert_eq!(ErrorCode::AstNotFound.as_str(), "AST_001");
        assert_eq!(
            EchoError::Scheduler("join failed".to_string()).code(),
            ErrorCode::Internal
        );
    }

    #[test]
    fn test_invalid_time_error() {
        let err = EchoError::invalid_time("25:00");
        assert_eq!(err.code(), ErrorCode::ParseInvalidTime);
        assert_eq!(err.code().as_str(), "PARSE_001");
        assert!(err.to_string().contains("25:00"));
        assert!(err.suggestion().is_some());
        assert!(!err.is_per_recipient());
    }

    #[test]
    fn test_catalog_errors() {
        let missing = EchoError::missing_directory(std::path::Path::new("/nowhere"));
        assert_eq!(missing.code(), ErrorCode::AstMissingFile);
        assert!(missing.to_string().contains("/nowhere"));

        let corrupt = EchoError::catalog("bad index");
        assert_eq!(corrupt.code(), ErrorCode::AstIndexCorrupted);
        assert!(corrupt.suggestion().is_some());
    }
}
