//! EAP-SIM/AKA key derivation and AT_MAC computation
//!
//! The master key is hashed per RFC 4186 Section 7 (SIM) and RFC 4187
//! Section 7 (AKA); the session keys K_encr, K_aut, MSK and EMSK are
//! expanded from it with the IKE prf+ construction. EAP-AKA' binds the
//! authenticated network name into an HMAC-SHA-256 based expansion
//! (RFC 5448 Section 3.3).

use crate::ike::crypto::PrfAlgorithm;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Length of AT_MAC values
pub const MAC_LEN: usize = 16;

const K_ENCR_LEN: usize = 16;
const K_AUT_LEN: usize = 16;
const K_AUT_LEN_AKA_PRIME: usize = 32;
const MSK_LEN: usize = 64;
const EMSK_LEN: usize = 64;

/// Session keys exported by a SIM/AKA method
#[derive(Debug, Clone)]
pub struct EapSimAkaKeys {
    /// Encryption key for AT_ENCR_DATA
    pub k_encr: Vec<u8>,
    /// Authentication key for AT_MAC
    pub k_aut: Vec<u8>,
    /// Master Session Key
    pub msk: Vec<u8>,
    /// Extended Master Session Key
    pub emsk: Vec<u8>,
}

impl Drop for EapSimAkaKeys {
    fn drop(&mut self) {
        self.k_encr.zeroize();
        self.k_aut.zeroize();
        self.msk.zeroize();
        self.emsk.zeroize();
    }
}

fn expand(prf: PrfAlgorithm, master_key: &[u8], k_aut_len: usize) -> EapSimAkaKeys {
    let total = K_ENCR_LEN + k_aut_len + MSK_LEN + EMSK_LEN;
    let keymat = prf.prf_plus(master_key, &[], total);

    let mut offset = 0;
    let mut take = |len: usize| {
        let part = keymat[offset..offset + len].to_vec();
        offset += len;
        part
    };

    EapSimAkaKeys {
        k_encr: take(K_ENCR_LEN),
        k_aut: take(k_aut_len),
        msk: take(MSK_LEN),
        emsk: take(EMSK_LEN),
    }
}

/// Derive EAP-SIM session keys.
///
/// ```text
/// MK = SHA1(Identity | n*Kc | NONCE_MT | Version List | Selected Version)
/// ```
pub fn derive_sim_keys(
    identity: &[u8],
    kcs: &[Vec<u8>],
    nonce_mt: &[u8; 16],
    version_list: &[u16],
    selected_version: u16,
) -> EapSimAkaKeys {
    let mut hasher = Sha1::new();
    hasher.update(identity);
    for kc in kcs {
        hasher.update(kc);
    }
    hasher.update(nonce_mt);
    for version in version_list {
        hasher.update(version.to_be_bytes());
    }
    hasher.update(selected_version.to_be_bytes());

    let mk = hasher.finalize();
    expand(PrfAlgorithm::HmacSha1, &mk, K_AUT_LEN)
}

/// Derive EAP-AKA session keys.
///
/// ```text
/// MK = SHA1(Identity | IK | CK)
/// ```
pub fn derive_aka_keys(identity: &[u8], ik: &[u8], ck: &[u8]) -> EapSimAkaKeys {
    let mut hasher = Sha1::new();
    hasher.update(identity);
    hasher.update(ik);
    hasher.update(ck);

    let mk = hasher.finalize();
    expand(PrfAlgorithm::HmacSha1, &mk, K_AUT_LEN)
}

/// Derive EAP-AKA' session keys, binding the authenticated network name.
pub fn derive_aka_prime_keys(
    identity: &[u8],
    ik: &[u8],
    ck: &[u8],
    network_name: &[u8],
) -> EapSimAkaKeys {
    let mut key = Vec::with_capacity(ik.len() + ck.len());
    key.extend_from_slice(ik);
    key.extend_from_slice(ck);

    let mut seed = Vec::new();
    seed.extend_from_slice(b"EAP-AKA'");
    seed.extend_from_slice(identity);
    seed.extend_from_slice(network_name);

    let total = K_ENCR_LEN + K_AUT_LEN_AKA_PRIME + MSK_LEN + EMSK_LEN;
    let keymat = PrfAlgorithm::HmacSha256.prf_plus(&key, &seed, total);
    key.zeroize();

    let mut offset = 0;
    let mut take = |len: usize| {
        let part = keymat[offset..offset + len].to_vec();
        offset += len;
        part
    };

    EapSimAkaKeys {
        k_encr: take(K_ENCR_LEN),
        k_aut: take(K_AUT_LEN_AKA_PRIME),
        msk: take(MSK_LEN),
        emsk: take(EMSK_LEN),
    }
}

/// Which MAC construction a method uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    /// HMAC-SHA1-128 (EAP-SIM, EAP-AKA)
    HmacSha1_128,
    /// HMAC-SHA256-128 (EAP-AKA')
    HmacSha256_128,
}

/// Compute AT_MAC over an EAP packet (with the MAC field zeroed) plus
/// method-specific extra data.
pub fn compute_mac(
    algorithm: MacAlgorithm,
    k_aut: &[u8],
    packet: &[u8],
    extra: &[u8],
) -> [u8; MAC_LEN] {
    let prf = match algorithm {
        MacAlgorithm::HmacSha1_128 => PrfAlgorithm::HmacSha1,
        MacAlgorithm::HmacSha256_128 => PrfAlgorithm::HmacSha256,
    };

    let mut data = Vec::with_capacity(packet.len() + extra.len());
    data.extend_from_slice(packet);
    data.extend_from_slice(extra);

    let full = prf.compute(k_aut, &data);
    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&full[..MAC_LEN]);
    mac
}

/// Verify a received AT_MAC in constant time.
pub fn verify_mac(
    algorithm: MacAlgorithm,
    k_aut: &[u8],
    packet: &[u8],
    extra: &[u8],
    received: &[u8; MAC_LEN],
) -> bool {
    let expected = compute_mac(algorithm, k_aut, packet, extra);
    expected.ct_eq(received).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_key_lengths() {
        let keys = derive_sim_keys(
            b"1234567890123456",
            &[vec![0x01; 8], vec![0x02; 8]],
            &[0xA5; 16],
            &[1],
            1,
        );

        assert_eq!(keys.k_encr.len(), 16);
        assert_eq!(keys.k_aut.len(), 16);
        assert_eq!(keys.msk.len(), 64);
        assert_eq!(keys.emsk.len(), 64);
        assert_ne!(keys.msk, keys.emsk);
    }

    #[test]
    fn test_sim_keys_depend_on_inputs() {
        let base = derive_sim_keys(b"id", &[vec![0x01; 8]], &[0xA5; 16], &[1], 1);
        let other_kc = derive_sim_keys(b"id", &[vec![0x02; 8]], &[0xA5; 16], &[1], 1);
        let other_nonce = derive_sim_keys(b"id", &[vec![0x01; 8]], &[0x5A; 16], &[1], 1);

        assert_ne!(base.msk, other_kc.msk);
        assert_ne!(base.msk, other_nonce.msk);
    }

    #[test]
    fn test_aka_key_lengths() {
        let keys = derive_aka_keys(b"0234567890123456", &[0x11; 16], &[0x22; 16]);
        assert_eq!(keys.k_aut.len(), 16);
        assert_eq!(keys.msk.len(), 64);
    }

    #[test]
    fn test_aka_prime_binds_network_name() {
        let a = derive_aka_prime_keys(b"id", &[0x11; 16], &[0x22; 16], b"WLAN");
        let b = derive_aka_prime_keys(b"id", &[0x11; 16], &[0x22; 16], b"LTE");

        assert_eq!(a.k_aut.len(), 32);
        assert_ne!(a.msk, b.msk);
        assert_ne!(a.k_aut, b.k_aut);
    }

    #[test]
    fn test_mac_roundtrip() {
        let k_aut = [0x0B; 16];
        let packet = b"eap packet with zeroed mac field";
        let extra = b"nonce";

        let mac = compute_mac(MacAlgorithm::HmacSha1_128, &k_aut, packet, extra);
        assert!(verify_mac(
            MacAlgorithm::HmacSha1_128,
            &k_aut,
            packet,
            extra,
            &mac
        ));

        let mut tampered = mac;
        tampered[0] ^= 1;
        assert!(!verify_mac(
            MacAlgorithm::HmacSha1_128,
            &k_aut,
            packet,
            extra,
            &tampered
        ));
    }

    #[test]
    fn test_mac_algorithms_differ() {
        let k_aut = [0x0B; 32];
        let packet = b"packet";

        let sha1 = compute_mac(MacAlgorithm::HmacSha1_128, &k_aut, packet, &[]);
        let sha256 = compute_mac(MacAlgorithm::HmacSha256_128, &k_aut, packet, &[]);
        assert_ne!(sha1, sha256);
    }
}
