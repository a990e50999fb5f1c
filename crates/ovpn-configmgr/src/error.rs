//! Error types shared by every part of the configuration manager.

use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ConfigMgrError>;

/// Configuration manager errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigMgrError {
    #[error("{0}")]
    AuthorizationDenied(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid override data type for '{key}': expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Could not resolve caller: {0}")]
    Identity(String),
}

impl ConfigMgrError {
    /// Stable error name handed to remote callers
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied(_) => "net.openvpn.v3.error.acl.denied",
            Self::Validation(_) => "net.openvpn.v3.configuration.error.validation",
            Self::NotFound(_) => "net.openvpn.v3.configuration.error.not-found",
            Self::Conflict(_) => "net.openvpn.v3.configuration.error.conflict",
            Self::TypeMismatch { .. } => "net.openvpn.v3.configuration.error.type-mismatch",
            Self::InvalidArgument(_) => "net.openvpn.v3.configuration.error.invalid-argument",
            Self::Io(_) => "net.openvpn.v3.configuration.error.io",
            Self::Parse(_) => "net.openvpn.v3.configuration.error.parse",
            Self::Identity(_) => "net.openvpn.v3.error.credentials",
        }
    }
}

impl From<serde_json::Error> for ConfigMgrError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_message() {
        let err = ConfigMgrError::TypeMismatch {
            key: "persist-tun".into(),
            expected: "boolean",
            got: "string",
        };
        assert_eq!(
            err.to_string(),
            "Invalid override data type for 'persist-tun': expected boolean, got string"
        );
        assert!(err.kind().ends_with("type-mismatch"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: ConfigMgrError = io_err.into();
        assert!(matches!(err, ConfigMgrError::Io(_)));
    }
}
