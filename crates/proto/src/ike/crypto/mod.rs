//! Cryptographic primitives for IKEv2
//!
//! PRF and key derivation, SK-payload ciphers (classic and AEAD), truncated
//! HMAC integrity, and Diffie-Hellman key exchange.

pub mod cipher;
pub mod dh;
pub mod integ;
pub mod prf;

pub use cipher::CipherAlgorithm;
pub use dh::{DhExchange, DhGroup};
pub use integ::IntegAlgorithm;
pub use prf::{ChildKeyMaterial, KeyMaterial, PrfAlgorithm};
