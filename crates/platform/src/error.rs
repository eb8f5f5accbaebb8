//! Error types for Burrow

use std::fmt;

/// Unified error type for all Burrow operations
#[derive(Debug)]
pub enum BurrowError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error
    Protocol(String),

    /// Security error (authentication, authorization, etc.)
    Security(String),

    /// An external collaborator (SIM applet, subscriber source) had no result
    Unavailable(String),

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for BurrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BurrowError::Io(e) => write!(f, "IO error: {}", e),
            BurrowError::Config(msg) => write!(f, "Configuration error: {}", msg),
            BurrowError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            BurrowError::Security(msg) => write!(f, "Security error: {}", msg),
            BurrowError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            BurrowError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for BurrowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BurrowError::Io(e) => Some(e),
            BurrowError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BurrowError {
    fn from(err: std::io::Error) -> Self {
        BurrowError::Io(err)
    }
}

/// Result type for Burrow operations
pub type BurrowResult<T> = Result<T, BurrowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BurrowError::Config("Invalid configuration".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let burrow_err: BurrowError = io_err.into();
        assert!(matches!(burrow_err, BurrowError::Io(_)));
    }

    #[test]
    fn test_result_type() {
        fn example() -> BurrowResult<i32> {
            Ok(42)
        }

        assert_eq!(example().unwrap(), 42);
    }

    #[test]
    fn test_unavailable_display() {
        let err = BurrowError::Unavailable("subscriber identity".to_string());
        assert_eq!(err.to_string(), "Unavailable: subscriber identity");
    }
}
