//! Error types for IKE and EAP protocol operations
//!
//! This module defines a unified error type for the IKE session, the wire
//! codec, the crypto layer, and the embedded EAP subsystem, together with a
//! coarse classification (`ErrorKind`) that drives how each failure is
//! handled: dropped silently, answered with a Notify, surfaced to the
//! caller, or fatal to the session.

use super::constants::NotifyType;
use std::fmt;

/// Result type for IKE operations
pub type Result<T> = std::result::Result<T, Error>;

/// How an error must be handled by the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Decoding error on untrusted bytes; drop the message, send nothing
    Silent,
    /// Well-defined protocol error; answer with the given Notify type
    Protocol(NotifyType),
    /// EAP-level semantic violation; closes the EAP session
    InvalidRequest,
    /// An external collaborator returned no result
    Unavailable,
    /// Unrecoverable; closes the IKE session
    Fatal,
}

/// IKE/EAP protocol errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Message or payload length/order violates the wire format
    InvalidSyntax(String),

    /// Unknown payload with the critical bit set
    UnsupportedCriticalPayload(u8),

    /// IKE major version is not 2
    InvalidMajorVersion(u8),

    /// Received message ID is outside the permitted window
    InvalidMessageId {
        /// The ID the window expected
        expected: u32,
        /// The ID actually received
        received: u32,
    },

    /// Integrity tag or AEAD verification failed
    IntegrityCheckFailed,

    /// Buffer too short for operation
    BufferTooShort {
        /// Required length
        required: usize,
        /// Available length
        available: usize,
    },

    /// Message exceeds the maximum IKE message size
    MessageTooLarge(u32),

    /// No acceptable proposal found
    NoProposalChosen,

    /// Peer authentication failed
    AuthenticationFailed(String),

    /// Unknown exchange type on a received message
    UnsupportedExchangeType(u8),

    /// Unknown non-skippable SIM/AKA attribute
    UnsupportedAttribute(u8),

    /// EAP-level semantic violation (e.g. duplicate notification)
    InvalidRequest(String),

    /// External collaborator returned no result (identity, SIM)
    Unavailable(String),

    /// Key has the wrong length for the negotiated algorithm
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Cryptographic operation failed
    CryptoError(String),

    /// No SA record matches the received SPI pair
    SaNotFound(String),

    /// SPI allocation retries exhausted
    SpiExhausted,

    /// Retransmission attempts exhausted without a response
    RetransmitExhausted,

    /// Operation attempted on a closed session
    SessionClosed,

    /// Event not valid in the current state
    InvalidState(String),

    /// Invalid argument supplied by the caller
    InvalidParameter(String),

    /// I/O error
    Io(String),

    /// Internal error (should not happen)
    Internal(String),
}

impl Error {
    /// Classify this error per the session handling policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidSyntax(_) => ErrorKind::Protocol(NotifyType::InvalidSyntax),
            Error::UnsupportedCriticalPayload(_) => {
                ErrorKind::Protocol(NotifyType::UnsupportedCriticalPayload)
            }
            Error::InvalidMajorVersion(_) => ErrorKind::Protocol(NotifyType::InvalidMajorVersion),
            Error::NoProposalChosen => ErrorKind::Protocol(NotifyType::NoProposalChosen),
            Error::AuthenticationFailed(_) => {
                ErrorKind::Protocol(NotifyType::AuthenticationFailed)
            }

            Error::InvalidMessageId { .. }
            | Error::BufferTooShort { .. }
            | Error::MessageTooLarge(_) => ErrorKind::Silent,

            Error::InvalidRequest(_) | Error::UnsupportedAttribute(_) => ErrorKind::InvalidRequest,

            Error::Unavailable(_) => ErrorKind::Unavailable,

            Error::IntegrityCheckFailed
            | Error::UnsupportedExchangeType(_)
            | Error::InvalidKeyLength { .. }
            | Error::CryptoError(_)
            | Error::SaNotFound(_)
            | Error::SpiExhausted
            | Error::RetransmitExhausted
            | Error::SessionClosed
            | Error::InvalidState(_)
            | Error::InvalidParameter(_)
            | Error::Io(_)
            | Error::Internal(_) => ErrorKind::Fatal,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSyntax(msg) => write!(f, "Invalid syntax: {}", msg),
            Error::UnsupportedCriticalPayload(t) => {
                write!(f, "Unsupported critical payload: {}", t)
            }
            Error::InvalidMajorVersion(v) => {
                write!(f, "Invalid IKE major version: 0x{:02x}", v)
            }
            Error::InvalidMessageId { expected, received } => {
                write!(
                    f,
                    "Invalid message ID: expected {}, received {}",
                    expected, received
                )
            }
            Error::IntegrityCheckFailed => write!(f, "Integrity check failed"),
            Error::BufferTooShort {
                required,
                available,
            } => {
                write!(
                    f,
                    "Buffer too short: need {} bytes, have {}",
                    required, available
                )
            }
            Error::MessageTooLarge(size) => {
                write!(f, "IKE message too large: {} bytes", size)
            }
            Error::NoProposalChosen => {
                write!(f, "No acceptable proposal found in negotiation")
            }
            Error::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}", msg)
            }
            Error::UnsupportedExchangeType(t) => {
                write!(f, "Unsupported exchange type: {}", t)
            }
            Error::UnsupportedAttribute(t) => {
                write!(f, "Unsupported non-skippable attribute: {}", t)
            }
            Error::InvalidRequest(msg) => write!(f, "Invalid EAP request: {}", msg),
            Error::Unavailable(what) => write!(f, "Unavailable: {}", what),
            Error::InvalidKeyLength { expected, actual } => {
                write!(
                    f,
                    "Invalid key length: expected {}, got {}",
                    expected, actual
                )
            }
            Error::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            Error::SaNotFound(id) => write!(f, "Security Association not found: {}", id),
            Error::SpiExhausted => write!(f, "SPI allocation retries exhausted"),
            Error::RetransmitExhausted => {
                write!(f, "Retransmission attempts exhausted")
            }
            Error::SessionClosed => write!(f, "Session is closed"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// Convert from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidSyntax("bad payload order".to_string());
        assert_eq!(err.to_string(), "Invalid syntax: bad payload order");

        let err = Error::InvalidMajorVersion(0x10);
        assert_eq!(err.to_string(), "Invalid IKE major version: 0x10");

        let err = Error::InvalidMessageId {
            expected: 3,
            received: 7,
        };
        assert_eq!(
            err.to_string(),
            "Invalid message ID: expected 3, received 7"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::InvalidSyntax(String::new()).kind(),
            ErrorKind::Protocol(NotifyType::InvalidSyntax)
        );
        assert_eq!(
            Error::NoProposalChosen.kind(),
            ErrorKind::Protocol(NotifyType::NoProposalChosen)
        );
        assert_eq!(
            Error::BufferTooShort {
                required: 4,
                available: 1
            }
            .kind(),
            ErrorKind::Silent
        );
        assert_eq!(
            Error::InvalidRequest(String::new()).kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            Error::Unavailable(String::new()).kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(Error::IntegrityCheckFailed.kind(), ErrorKind::Fatal);
        assert_eq!(Error::RetransmitExhausted.kind(), ErrorKind::Fatal);
        assert_eq!(Error::SpiExhausted.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "socket gone");
        let err: Error = io_err.into();
        match err {
            Error::Io(msg) => assert!(msg.contains("socket gone")),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_clone_eq() {
        let err1 = Error::NoProposalChosen;
        let err2 = err1.clone();
        assert_eq!(err1, err2);
    }
}
