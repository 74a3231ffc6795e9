use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading, parsing,
/// or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The specified config file was not found.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// TOML parsing failed.
    #[error("TOML parse error: {0}")]
    Parse(String),

    /// A config value failed validation.
    #[error("validation error: {field}: {message}")]
    Validation {
        /// The dotted field path (e.g. `session.outbound_queue`).
        field: String,
        /// Human-readable description of the violation.
        message: String,
    },

    /// An I/O error occurred while reading the config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_contains_path() {
        let err = ConfigError::NotFound(PathBuf::from("/tmp/dapline.toml"));
        let msg = format!("{err}");
        assert!(msg.contains("/tmp/dapline.toml"));
        assert!(msg.contains("config file not found"));
    }

    #[test]
    fn parse_display_contains_details() {
        let err = ConfigError::Parse("expected `=`".into());
        let msg = format!("{err}");
        assert!(msg.contains("expected `=`"));
        assert!(msg.contains("TOML parse error"));
    }

    #[test]
    fn validation_display_contains_field_and_message() {
        let err = ConfigError::Validation {
            field: "session.outbound_queue".into(),
            message: "must be 1..=65536, got 0".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("session.outbound_queue"));
        assert!(msg.contains("got 0"));
        assert!(msg.contains("validation error"));
    }

    #[test]
    fn io_error_display_contains_inner() {
        let inner = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ConfigError::from(inner);
        assert!(format!("{err}").contains("denied"));
    }
}
