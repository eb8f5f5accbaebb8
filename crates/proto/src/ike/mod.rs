//! IKEv2 initiator implementation (RFC 7296)
//!
//! This module implements the initiator side of the Internet Key Exchange
//! protocol version 2, including:
//!
//! - **IKE_SA_INIT / IKE_AUTH** - SA negotiation and peer authentication
//!   (PSK, digital signature, or EAP via [`crate::eap`])
//! - **CREATE_CHILD_SA** - child SA negotiation and IKE SA rekeying,
//!   including simultaneous-rekey collision resolution
//! - **INFORMATIONAL** - deletes, notifications, liveness
//! - **NAT-T** - UDP encapsulation framing (RFC 3948)
//!
//! # Architecture
//!
//! ```text
//! IkeClient (tokio driver: socket, timers, queue)
//!   └── IkeSession (run-to-completion state machine)
//!         ├── IkeSaRecord (keys, message IDs, nonce ordering)
//!         ├── EapAuthenticator (embedded EAP, crate::eap)
//!         ├── Wire codec (message, payload, proposal)
//!         └── Crypto (PRF/prf+, ciphers, integrity, DH)
//! ```
//!
//! Child SA keying material is handed to the external installer; the ESP
//! dataplane itself lives outside this crate.
//!
//! # Security
//!
//! - No unsafe code
//! - Constant-time comparison for checksums and AUTH data
//! - Key material zeroized on drop
//! - Strict message-ID windows and replay rejection

#![forbid(unsafe_code)]

pub mod auth;
pub mod child;
pub mod client;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod message;
pub mod payload;
pub mod proposal;
pub mod retransmit;
pub mod sa;
pub mod session;
pub mod spi;

// Re-export commonly used types
pub use client::IkeClient;
pub use config::{AuthConfig, IkeSessionConfig};
pub use error::{Error, ErrorKind, Result};
pub use session::{IkeSession, LocalRequestKind, SessionCallback, SessionState};
