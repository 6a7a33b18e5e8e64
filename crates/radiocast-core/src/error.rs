//! Error types shared across the Radiocast crates

use std::{error::Error as StdError, fmt};

/// Main error type for the Radiocast server
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Configuration {
        /// Error message
        message: String,
    },

    /// Database error
    Database(String),

    /// Control protocol error (malformed or unexpected frame)
    Protocol {
        /// Error message
        message: String,
    },

    /// Validation error
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// Not found error
    NotFound {
        /// Resource that was not found
        resource: String,
    },

    /// Downstream forwarding error
    Forward(String),

    /// Serialization error
    Serialization(serde_json::Error),

    /// Other error
    Other(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Configuration { message } => write!(f, "Configuration error: {message}"),
            Self::Database(msg) => write!(f, "Database error: {msg}"),
            Self::Protocol { message } => write!(f, "Protocol error: {message}"),
            Self::Validation { field, message } => {
                write!(f, "Validation error: {field} - {message}")
            }
            Self::NotFound { resource } => write!(f, "Resource not found: {resource}"),
            Self::Forward(msg) => write!(f, "Downstream error: {msg}"),
            Self::Serialization(err) => write!(f, "Serialization error: {err}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_error);

        match err {
            Error::Io(_) => {}
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(
            format!("{}", Error::Database("connection refused".to_string())),
            "Database error: connection refused"
        );
        assert_eq!(
            format!(
                "{}",
                Error::Protocol {
                    message: "missing tag".to_string()
                }
            ),
            "Protocol error: missing tag"
        );
        assert_eq!(
            format!(
                "{}",
                Error::Validation {
                    field: "talkgroup".to_string(),
                    message: "required".to_string()
                }
            ),
            "Validation error: talkgroup - required"
        );
        assert_eq!(
            format!(
                "{}",
                Error::NotFound {
                    resource: "call 42".to_string()
                }
            ),
            "Resource not found: call 42"
        );
    }

    #[test]
    fn test_serialization_error_has_source() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err = Error::from(json_err);
        assert!(err.source().is_some());
    }
}
