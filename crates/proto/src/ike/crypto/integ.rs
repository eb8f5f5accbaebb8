//! Integrity algorithms for the IKEv2 Encrypted payload
//!
//! Truncated HMAC checksums per RFC 7296 Section 3.3.2, with constant-time
//! verification.

use crate::ike::{Error, Result};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

/// Integrity algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegAlgorithm {
    /// HMAC-SHA1-96
    HmacSha1_96,
    /// HMAC-SHA2-256-128
    HmacSha256_128,
    /// HMAC-SHA2-384-192
    HmacSha384_192,
    /// HMAC-SHA2-512-256
    HmacSha512_256,
}

impl IntegAlgorithm {
    /// Key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            IntegAlgorithm::HmacSha1_96 => 20,
            IntegAlgorithm::HmacSha256_128 => 32,
            IntegAlgorithm::HmacSha384_192 => 48,
            IntegAlgorithm::HmacSha512_256 => 64,
        }
    }

    /// Truncated checksum length in bytes
    pub fn checksum_len(self) -> usize {
        match self {
            IntegAlgorithm::HmacSha1_96 => 12,
            IntegAlgorithm::HmacSha256_128 => 16,
            IntegAlgorithm::HmacSha384_192 => 24,
            IntegAlgorithm::HmacSha512_256 => 32,
        }
    }

    /// Compute the truncated checksum over `data`
    pub fn compute(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut full = match self {
            IntegAlgorithm::HmacSha1_96 => {
                let mut mac =
                    Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            IntegAlgorithm::HmacSha256_128 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            IntegAlgorithm::HmacSha384_192 => {
                let mut mac =
                    Hmac::<Sha384>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            IntegAlgorithm::HmacSha512_256 => {
                let mut mac =
                    Hmac::<Sha512>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };

        full.truncate(self.checksum_len());
        full
    }

    /// Verify a received checksum in constant time.
    pub fn verify(self, key: &[u8], data: &[u8], checksum: &[u8]) -> Result<()> {
        let expected = self.compute(key, data);

        if checksum.len() != expected.len() {
            return Err(Error::IntegrityCheckFailed);
        }
        if expected.ct_eq(checksum).unwrap_u8() != 1 {
            return Err(Error::IntegrityCheckFailed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_lengths() {
        assert_eq!(IntegAlgorithm::HmacSha1_96.checksum_len(), 12);
        assert_eq!(IntegAlgorithm::HmacSha256_128.checksum_len(), 16);
        assert_eq!(IntegAlgorithm::HmacSha384_192.checksum_len(), 24);
        assert_eq!(IntegAlgorithm::HmacSha512_256.checksum_len(), 32);
    }

    #[test]
    fn test_compute_and_verify() {
        let key = [0x0B; 32];
        let data = b"authenticated message";

        let checksum = IntegAlgorithm::HmacSha256_128.compute(&key, data);
        assert_eq!(checksum.len(), 16);

        assert!(IntegAlgorithm::HmacSha256_128
            .verify(&key, data, &checksum)
            .is_ok());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let key = [0x0B; 32];
        let data = b"authenticated message";

        let mut checksum = IntegAlgorithm::HmacSha256_128.compute(&key, data);
        checksum[0] ^= 0x01;

        let result = IntegAlgorithm::HmacSha256_128.verify(&key, data, &checksum);
        assert!(matches!(result, Err(Error::IntegrityCheckFailed)));
    }

    #[test]
    fn test_verify_rejects_wrong_length() {
        let key = [0x0B; 32];
        let data = b"authenticated message";

        let checksum = IntegAlgorithm::HmacSha256_128.compute(&key, data);
        let result = IntegAlgorithm::HmacSha256_128.verify(&key, data, &checksum[..8]);
        assert!(matches!(result, Err(Error::IntegrityCheckFailed)));
    }
}
