//! Protocol implementations for the Burrow VPN ecosystem.
//!
//! This crate provides the control plane of an IKEv2/IPsec VPN initiator:
//!
//! - **IKEv2** (Internet Key Exchange v2) - RFC 7296 initiator with
//!   rekeying and simultaneous-rekey resolution
//! - **EAP** (Extensible Authentication Protocol) - RFC 3748 peer with
//!   EAP-SIM, EAP-AKA, EAP-AKA' and EAP-MSCHAPv2 methods
//!
//! # Features
//!
//! - `ike` (default) - IKEv2 initiator and the embedded EAP subsystem
//!
//! # Example
//!
//! ```rust
//! use burrow_proto::ike::message::IkeHeader;
//!
//! // Parse an IKE header from the wire
//! let mut data = vec![0u8; 28];
//! data[17] = 0x20; // IKEv2
//! data[18] = 34;   // IKE_SA_INIT
//! data[24..28].copy_from_slice(&28u32.to_be_bytes());
//!
//! let header = IkeHeader::from_bytes(&data).unwrap();
//! assert_eq!(header.message_id, 0);
//! ```
//!
//! # Security
//!
//! All cryptographic operations use vetted libraries (RustCrypto, `ring`,
//! `dalek`); authentication comparisons are constant time; key material is
//! zeroized on drop.
//!
//! # References
//!
//! - [RFC 7296](https://datatracker.ietf.org/doc/html/rfc7296) - IKEv2 Protocol
//! - [RFC 3748](https://datatracker.ietf.org/doc/html/rfc3748) - EAP
//! - [RFC 4186](https://datatracker.ietf.org/doc/html/rfc4186) - EAP-SIM
//! - [RFC 4187](https://datatracker.ietf.org/doc/html/rfc4187) - EAP-AKA
//! - [RFC 5448](https://datatracker.ietf.org/doc/html/rfc5448) - EAP-AKA'
//! - [RFC 2759](https://datatracker.ietf.org/doc/html/rfc2759) - MSCHAPv2

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ike")]
pub mod eap;
#[cfg(feature = "ike")]
pub mod ike;
