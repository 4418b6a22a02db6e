//! Error types and handling for FSH compilation

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for FSH compilation
#[derive(Debug, Error)]
pub enum TemakiError {
    /// Parse errors from FSH syntax issues
    #[error("Parse error: {message} at {location}")]
    ParseError {
        message: String,
        location: Box<crate::diagnostics::Location>,
    },

    #[error("Recursive RuleSet insertion detected: {ruleset_chain}")]
    RecursiveRuleSetInsertion { ruleset_chain: String },

    /// Configuration loading or validation errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File system I/O errors
    #[error("IO error for path '{path}': {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Semantic analysis errors (unresolved names, bad references)
    #[error("Semantic error: {message}")]
    SemanticError { message: String },

    /// Export errors (rule application, artifact emission)
    #[error("Export error: {message}")]
    ExportError { message: String },

    /// Definitions cache loading errors
    #[error("Package load error: {message}")]
    PackageLoad { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

/// Error kind enumeration for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Config,
    Io,
    Semantic,
    Export,
    PackageLoad,
    Internal,
}

impl TemakiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TemakiError::ParseError { .. } => ErrorKind::Parse,
            TemakiError::RecursiveRuleSetInsertion { .. } => ErrorKind::Parse,
            TemakiError::ConfigError { .. } => ErrorKind::Config,
            TemakiError::IoError { .. } => ErrorKind::Io,
            TemakiError::SemanticError { .. } => ErrorKind::Semantic,
            TemakiError::ExportError { .. } => ErrorKind::Export,
            TemakiError::PackageLoad { .. } => ErrorKind::PackageLoad,
            TemakiError::InternalError { .. } => ErrorKind::Internal,
        }
    }

    /// Whether compilation can continue past this error. Only catastrophic
    /// conditions (unreadable config, unloadable definitions, I/O failures)
    /// halt the run; everything else skips the offending entity.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Parse | ErrorKind::Semantic | ErrorKind::Export
        )
    }

    pub fn parse_error(message: impl Into<String>, location: crate::diagnostics::Location) -> Self {
        Self::ParseError {
            message: message.into(),
            location: Box::new(location),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    pub fn semantic_error(message: impl Into<String>) -> Self {
        Self::SemanticError {
            message: message.into(),
        }
    }

    pub fn export_error(message: impl Into<String>) -> Self {
        Self::ExportError {
            message: message.into(),
        }
    }

    pub fn package_load(message: impl Into<String>) -> Self {
        Self::PackageLoad {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TemakiError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            path: PathBuf::new(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_recoverability() {
        assert_eq!(
            TemakiError::semantic_error("x").kind(),
            ErrorKind::Semantic
        );
        assert!(TemakiError::export_error("x").is_recoverable());
        assert!(!TemakiError::package_load("x").is_recoverable());
        assert!(!TemakiError::config_error("x").is_recoverable());
    }
}
