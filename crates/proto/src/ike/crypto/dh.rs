//! Diffie-Hellman key exchange for IKE_SA_INIT and rekeys
//!
//! Implements the 2048-bit MODP group (RFC 3526 group 14) and Curve25519
//! (RFC 8031 group 31).

use crate::ike::{Error, Result};
use ring::agreement::{agree_ephemeral, EphemeralPrivateKey, UnparsedPublicKey, X25519};
use ring::rand::SystemRandom;
use zeroize::Zeroize;

/// Supported Diffie-Hellman groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhGroup {
    /// 2048-bit MODP group (14)
    Modp2048,
    /// Curve25519 (31)
    Curve25519,
}

impl DhGroup {
    /// Construct from the IANA transform ID
    pub fn from_transform_id(id: u16) -> Option<Self> {
        match id {
            14 => Some(DhGroup::Modp2048),
            31 => Some(DhGroup::Curve25519),
            _ => None,
        }
    }

    /// The IANA transform ID
    pub fn transform_id(self) -> u16 {
        match self {
            DhGroup::Modp2048 => 14,
            DhGroup::Curve25519 => 31,
        }
    }

    /// Length of the public value in bytes
    pub fn public_len(self) -> usize {
        match self {
            DhGroup::Modp2048 => 256,
            DhGroup::Curve25519 => 32,
        }
    }
}

/// RFC 3526 group 14 parameters
mod modp2048 {
    use num_bigint::BigUint;
    use once_cell::sync::Lazy;

    /// The 2048-bit MODP prime
    pub static P: Lazy<BigUint> = Lazy::new(|| {
        BigUint::parse_bytes(
            b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
              8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B\
              302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9\
              A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6\
              49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8\
              FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D\
              670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C\
              180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
              3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFF\
              FFFFFFFF",
            16,
        )
        .expect("valid RFC 3526 prime")
    });

    /// The generator
    pub static G: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));
}

/// An in-flight Diffie-Hellman exchange
///
/// Holds the ephemeral private value until the peer's public value arrives;
/// MODP private keys are zeroized on drop.
pub enum DhExchange {
    /// MODP group 14 exchange
    Modp2048 {
        /// Private exponent bytes (big-endian)
        private: Vec<u8>,
        /// Public value g^x mod p, left-padded to 256 bytes
        public: Vec<u8>,
    },
    /// Curve25519 exchange
    Curve25519 {
        /// Ephemeral private key (consumed by agreement)
        private: Option<EphemeralPrivateKey>,
        /// 32-byte public value
        public: Vec<u8>,
    },
}

impl std::fmt::Debug for DhExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DhExchange::Modp2048 { public, .. } => f
                .debug_struct("DhExchange::Modp2048")
                .field("public_len", &public.len())
                .finish_non_exhaustive(),
            DhExchange::Curve25519 { public, .. } => f
                .debug_struct("DhExchange::Curve25519")
                .field("public_len", &public.len())
                .finish_non_exhaustive(),
        }
    }
}

impl DhExchange {
    /// Generate an ephemeral key pair for the given group.
    pub fn new(group: DhGroup) -> Result<Self> {
        match group {
            DhGroup::Modp2048 => {
                use num_bigint::{BigUint, RandBigInt};
                use rand::thread_rng;

                let p = &*modp2048::P;
                let p_minus_one = p - BigUint::from(1u32);

                let mut rng = thread_rng();
                let x = rng.gen_biguint_range(&BigUint::from(2u32), &p_minus_one);
                let public = modp2048::G.modpow(&x, p);

                Ok(DhExchange::Modp2048 {
                    private: x.to_bytes_be(),
                    public: left_pad(&public.to_bytes_be(), 256),
                })
            }
            DhGroup::Curve25519 => {
                let rng = SystemRandom::new();
                let private = EphemeralPrivateKey::generate(&X25519, &rng)
                    .map_err(|_| Error::CryptoError("X25519 key generation failed".into()))?;
                let public = private
                    .compute_public_key()
                    .map_err(|_| Error::CryptoError("X25519 public key failed".into()))?
                    .as_ref()
                    .to_vec();

                Ok(DhExchange::Curve25519 {
                    private: Some(private),
                    public,
                })
            }
        }
    }

    /// The group this exchange uses
    pub fn group(&self) -> DhGroup {
        match self {
            DhExchange::Modp2048 { .. } => DhGroup::Modp2048,
            DhExchange::Curve25519 { .. } => DhGroup::Curve25519,
        }
    }

    /// Our public value for the KE payload
    pub fn public_key(&self) -> &[u8] {
        match self {
            DhExchange::Modp2048 { public, .. } => public,
            DhExchange::Curve25519 { public, .. } => public,
        }
    }

    /// Compute the shared secret g^ir from the peer's public value.
    ///
    /// Consumes the exchange; the private value cannot be reused.
    pub fn compute_shared_secret(mut self, peer_public: &[u8]) -> Result<Vec<u8>> {
        match &mut self {
            DhExchange::Modp2048 { private, .. } => {
                use num_bigint::BigUint;

                if peer_public.len() != 256 {
                    return Err(Error::CryptoError(format!(
                        "MODP-2048 public value must be 256 bytes, got {}",
                        peer_public.len()
                    )));
                }

                let y_peer = BigUint::from_bytes_be(peer_public);
                // Reject degenerate public values
                if y_peer <= BigUint::from(1u32) || y_peer >= *modp2048::P {
                    return Err(Error::CryptoError(
                        "Peer MODP public value out of range".into(),
                    ));
                }

                let x = BigUint::from_bytes_be(private);
                let shared = y_peer.modpow(&x, &modp2048::P);
                Ok(left_pad(&shared.to_bytes_be(), 256))
            }
            DhExchange::Curve25519 { private, .. } => {
                if peer_public.len() != 32 {
                    return Err(Error::CryptoError(format!(
                        "X25519 public value must be 32 bytes, got {}",
                        peer_public.len()
                    )));
                }

                let private = private
                    .take()
                    .ok_or_else(|| Error::Internal("X25519 private key already used".into()))?;
                let peer = UnparsedPublicKey::new(&X25519, peer_public);

                agree_ephemeral(private, &peer, |secret| secret.to_vec())
                    .map_err(|_| Error::CryptoError("X25519 agreement failed".into()))
            }
        }
    }
}

impl Drop for DhExchange {
    fn drop(&mut self) {
        if let DhExchange::Modp2048 { private, .. } = self {
            private.zeroize();
        }
    }
}

/// Left-pad a big-endian value to `len` bytes
fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    if bytes.len() >= len {
        return bytes.to_vec();
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_ids() {
        assert_eq!(DhGroup::from_transform_id(14), Some(DhGroup::Modp2048));
        assert_eq!(DhGroup::from_transform_id(31), Some(DhGroup::Curve25519));
        assert_eq!(DhGroup::from_transform_id(99), None);

        assert_eq!(DhGroup::Modp2048.transform_id(), 14);
        assert_eq!(DhGroup::Curve25519.public_len(), 32);
    }

    #[test]
    fn test_modp2048_agreement() {
        let alice = DhExchange::new(DhGroup::Modp2048).unwrap();
        let bob = DhExchange::new(DhGroup::Modp2048).unwrap();

        let alice_public = alice.public_key().to_vec();
        let bob_public = bob.public_key().to_vec();
        assert_eq!(alice_public.len(), 256);

        let alice_secret = alice.compute_shared_secret(&bob_public).unwrap();
        let bob_secret = bob.compute_shared_secret(&alice_public).unwrap();
        assert_eq!(alice_secret, bob_secret);
        assert_eq!(alice_secret.len(), 256);
    }

    #[test]
    fn test_curve25519_agreement() {
        let alice = DhExchange::new(DhGroup::Curve25519).unwrap();
        let bob = DhExchange::new(DhGroup::Curve25519).unwrap();

        let alice_public = alice.public_key().to_vec();
        let bob_public = bob.public_key().to_vec();
        assert_eq!(alice_public.len(), 32);

        let alice_secret = alice.compute_shared_secret(&bob_public).unwrap();
        let bob_secret = bob.compute_shared_secret(&alice_public).unwrap();
        assert_eq!(alice_secret, bob_secret);
    }

    #[test]
    fn test_modp_rejects_degenerate_public() {
        let alice = DhExchange::new(DhGroup::Modp2048).unwrap();
        let result = alice.compute_shared_secret(&[0u8; 256]);
        assert!(result.is_err());

        let alice = DhExchange::new(DhGroup::Modp2048).unwrap();
        let mut one = vec![0u8; 256];
        one[255] = 1;
        assert!(alice.compute_shared_secret(&one).is_err());
    }

    #[test]
    fn test_wrong_public_length() {
        let alice = DhExchange::new(DhGroup::Curve25519).unwrap();
        assert!(alice.compute_shared_secret(&[0u8; 16]).is_err());
    }
}
