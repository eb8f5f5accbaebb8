//! IKE_AUTH payload computation (RFC 7296 Section 2.15)
//!
//! The AUTH payload signs the "signed octets": the peer's first message,
//! our nonce, and the PRF of the signer's identification payload under
//! SK_p. Pre-shared-key authentication MACs those octets under a key
//! stretched from the PSK; EAP-concluded exchanges substitute the
//! exported MSK for the PSK.

use super::crypto::PrfAlgorithm;
use super::payload::{IdPayload, Identification};
use crate::ike::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use subtle::ConstantTimeEq;

const KEY_PAD: &[u8] = b"Key Pad for IKEv2";

/// Compute the signed octets for one side of the AUTH exchange.
///
/// `first_message` is that side's complete IKE_SA_INIT message as sent on
/// the wire, `peer_nonce` is the other side's nonce, and `sk_p` is the
/// signer's SK_p key.
pub fn signed_octets(
    first_message: &[u8],
    peer_nonce: &[u8],
    prf: PrfAlgorithm,
    sk_p: &[u8],
    id: &Identification,
) -> Vec<u8> {
    let id_body = IdPayload::new(id.clone()).to_payload_data();
    let mac_id = prf.compute(sk_p, &id_body);

    let mut octets =
        Vec::with_capacity(first_message.len() + peer_nonce.len() + mac_id.len());
    octets.extend_from_slice(first_message);
    octets.extend_from_slice(peer_nonce);
    octets.extend_from_slice(&mac_id);
    octets
}

/// Compute shared-key AUTH data: prf(prf(secret, "Key Pad for IKEv2"), octets).
///
/// `secret` is the PSK, or the EAP MSK after an EAP exchange.
pub fn shared_key_auth(prf: PrfAlgorithm, secret: &[u8], octets: &[u8]) -> Vec<u8> {
    let stretched = prf.compute(secret, KEY_PAD);
    prf.compute(&stretched, octets)
}

/// Verify received shared-key AUTH data in constant time.
pub fn verify_shared_key_auth(
    prf: PrfAlgorithm,
    secret: &[u8],
    octets: &[u8],
    received: &[u8],
) -> Result<()> {
    let expected = shared_key_auth(prf, secret, octets);
    if expected.len() != received.len() || expected.ct_eq(received).unwrap_u8() != 1 {
        return Err(Error::AuthenticationFailed("AUTH payload mismatch".into()));
    }
    Ok(())
}

/// Sign the octets with an Ed25519 key for digital-signature AUTH.
pub fn sign_auth(key: &[u8], octets: &[u8]) -> Result<Vec<u8>> {
    let key: [u8; 32] = key
        .try_into()
        .map_err(|_| Error::InvalidParameter("Ed25519 key must be 32 bytes".into()))?;
    let signing_key = SigningKey::from_bytes(&key);
    Ok(signing_key.sign(octets).to_bytes().to_vec())
}

/// Verify an Ed25519 digital-signature AUTH.
pub fn verify_signature_auth(public_key: &[u8], octets: &[u8], signature: &[u8]) -> Result<()> {
    let public: [u8; 32] = public_key
        .try_into()
        .map_err(|_| Error::AuthenticationFailed("Bad Ed25519 public key".into()))?;
    let verifying_key = VerifyingKey::from_bytes(&public)
        .map_err(|_| Error::AuthenticationFailed("Bad Ed25519 public key".into()))?;

    let signature = Signature::from_slice(signature)
        .map_err(|_| Error::AuthenticationFailed("Bad signature length".into()))?;

    verifying_key
        .verify(octets, &signature)
        .map_err(|_| Error::AuthenticationFailed("Signature verification failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_octets() -> Vec<u8> {
        signed_octets(
            &[0xAA; 120],
            &[0xBB; 32],
            PrfAlgorithm::HmacSha256,
            &[0xCC; 32],
            &Identification::Fqdn("client.example.com".into()),
        )
    }

    #[test]
    fn test_signed_octets_structure() {
        let octets = sample_octets();
        // message + nonce + prf output
        assert_eq!(octets.len(), 120 + 32 + 32);
        assert_eq!(&octets[..120], &[0xAA; 120]);
        assert_eq!(&octets[120..152], &[0xBB; 32]);
    }

    #[test]
    fn test_shared_key_auth_roundtrip() {
        let octets = sample_octets();
        let auth = shared_key_auth(PrfAlgorithm::HmacSha256, b"swordfish", &octets);

        assert!(verify_shared_key_auth(
            PrfAlgorithm::HmacSha256,
            b"swordfish",
            &octets,
            &auth
        )
        .is_ok());

        assert!(verify_shared_key_auth(
            PrfAlgorithm::HmacSha256,
            b"wrong-psk",
            &octets,
            &auth
        )
        .is_err());
    }

    #[test]
    fn test_shared_key_auth_differs_from_plain_prf() {
        let octets = sample_octets();
        let auth = shared_key_auth(PrfAlgorithm::HmacSha256, b"secret", &octets);
        let plain = PrfAlgorithm::HmacSha256.compute(b"secret", &octets);
        assert_ne!(auth, plain);
    }

    #[test]
    fn test_signature_auth_roundtrip() {
        let key = [0x42u8; 32];
        let signing_key = SigningKey::from_bytes(&key);
        let public = signing_key.verifying_key().to_bytes();

        let octets = sample_octets();
        let signature = sign_auth(&key, &octets).unwrap();

        assert!(verify_signature_auth(&public, &octets, &signature).is_ok());

        let mut tampered = octets.clone();
        tampered[0] ^= 1;
        assert!(verify_signature_auth(&public, &tampered, &signature).is_err());
    }

    #[test]
    fn test_bad_key_lengths() {
        assert!(sign_auth(&[0u8; 16], b"octets").is_err());
        assert!(verify_signature_auth(&[0u8; 16], b"octets", &[0u8; 64]).is_err());
    }
}
