//! Pseudo-Random Function (PRF) implementations
//!
//! Implements PRF algorithms and the IKEv2 key schedule as defined in
//! RFC 7296 Sections 2.13 and 2.14, including the rekey schedule of
//! Section 2.18.

use crate::ike::{Error, Result};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroize;

/// PRF algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrfAlgorithm {
    /// HMAC-SHA1 (used by the EAP SIM/AKA key expansion)
    HmacSha1,
    /// HMAC-SHA2-256
    HmacSha256,
    /// HMAC-SHA2-384
    HmacSha384,
    /// HMAC-SHA2-512
    HmacSha512,
}

impl PrfAlgorithm {
    /// Get PRF output length in bytes
    pub fn output_len(self) -> usize {
        match self {
            PrfAlgorithm::HmacSha1 => 20,
            PrfAlgorithm::HmacSha256 => 32,
            PrfAlgorithm::HmacSha384 => 48,
            PrfAlgorithm::HmacSha512 => 64,
        }
    }

    /// Compute PRF over `data` keyed by `key`
    pub fn compute(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            PrfAlgorithm::HmacSha1 => {
                let mut mac =
                    Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            PrfAlgorithm::HmacSha256 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            PrfAlgorithm::HmacSha384 => {
                let mut mac =
                    Hmac::<Sha384>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            PrfAlgorithm::HmacSha512 => {
                let mut mac =
                    Hmac::<Sha512>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Compute prf+ (key expansion function)
    ///
    /// Defined in RFC 7296 Section 2.13:
    /// ```text
    /// prf+ (K,S) = T1 | T2 | T3 | T4 | ...
    ///
    /// where:
    /// T1 = prf (K, S | 0x01)
    /// T2 = prf (K, T1 | S | 0x02)
    /// T3 = prf (K, T2 | S | 0x03)
    /// ...
    /// ```
    pub fn prf_plus(self, key: &[u8], seed: &[u8], output_len: usize) -> Vec<u8> {
        let mut output = Vec::with_capacity(output_len);
        let mut t = Vec::new();
        let mut counter: u8 = 1;

        while output.len() < output_len {
            let mut input = Vec::new();
            input.extend_from_slice(&t);
            input.extend_from_slice(seed);
            input.push(counter);

            t = self.compute(key, &input);
            output.extend_from_slice(&t);

            counter += 1;
        }

        output.truncate(output_len);
        output
    }
}

/// IKEv2 key material for one IKE SA
///
/// SK_a keys are empty when the negotiated cipher is combined-mode.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    /// SK_d - Key for deriving Child SA keys and rekey SKEYSEED
    pub sk_d: Vec<u8>,

    /// SK_ai - Initiator's integrity key
    pub sk_ai: Vec<u8>,

    /// SK_ar - Responder's integrity key
    pub sk_ar: Vec<u8>,

    /// SK_ei - Initiator's encryption key
    pub sk_ei: Vec<u8>,

    /// SK_er - Responder's encryption key
    pub sk_er: Vec<u8>,

    /// SK_pi - Initiator's AUTH payload key
    pub sk_pi: Vec<u8>,

    /// SK_pr - Responder's AUTH payload key
    pub sk_pr: Vec<u8>,
}

impl KeyMaterial {
    fn split(
        prf_alg: PrfAlgorithm,
        skeyseed: &[u8],
        nonce_i: &[u8],
        nonce_r: &[u8],
        spi_i: &[u8; 8],
        spi_r: &[u8; 8],
        encr_key_len: usize,
        integ_key_len: usize,
    ) -> Self {
        let mut seed = Vec::new();
        seed.extend_from_slice(nonce_i);
        seed.extend_from_slice(nonce_r);
        seed.extend_from_slice(spi_i);
        seed.extend_from_slice(spi_r);

        let prf_len = prf_alg.output_len();
        let total_len = prf_len + 2 * integ_key_len + 2 * encr_key_len + 2 * prf_len;

        let keymat = prf_alg.prf_plus(skeyseed, &seed, total_len);

        let mut offset = 0;
        let mut take = |len: usize| {
            let part = keymat[offset..offset + len].to_vec();
            offset += len;
            part
        };

        KeyMaterial {
            sk_d: take(prf_len),
            sk_ai: take(integ_key_len),
            sk_ar: take(integ_key_len),
            sk_ei: take(encr_key_len),
            sk_er: take(encr_key_len),
            sk_pi: take(prf_len),
            sk_pr: take(prf_len),
        }
    }

    /// Derive the initial IKE key schedule (RFC 7296 Section 2.14):
    ///
    /// ```text
    /// SKEYSEED = prf(Ni | Nr, g^ir)
    /// {SK_d | SK_ai | SK_ar | SK_ei | SK_er | SK_pi | SK_pr}
    ///     = prf+ (SKEYSEED, Ni | Nr | SPIi | SPIr)
    /// ```
    ///
    /// `integ_key_len` is 0 for combined-mode ciphers.
    #[allow(clippy::too_many_arguments)]
    pub fn derive(
        prf_alg: PrfAlgorithm,
        nonce_i: &[u8],
        nonce_r: &[u8],
        shared_secret: &[u8],
        spi_i: &[u8; 8],
        spi_r: &[u8; 8],
        encr_key_len: usize,
        integ_key_len: usize,
    ) -> Result<Self> {
        if nonce_i.is_empty() || nonce_r.is_empty() {
            return Err(Error::Internal("Nonces not set for key derivation".into()));
        }

        let mut prf_key = Vec::new();
        prf_key.extend_from_slice(nonce_i);
        prf_key.extend_from_slice(nonce_r);

        let skeyseed = prf_alg.compute(&prf_key, shared_secret);

        Ok(Self::split(
            prf_alg,
            &skeyseed,
            nonce_i,
            nonce_r,
            spi_i,
            spi_r,
            encr_key_len,
            integ_key_len,
        ))
    }

    /// Derive the key schedule for a rekeyed IKE SA (RFC 7296 Section 2.18):
    ///
    /// ```text
    /// SKEYSEED = prf(SK_d (old), g^ir (new) | Ni | Nr)
    /// ```
    ///
    /// The old SA's SK_d is consumed exactly once for this derivation.
    #[allow(clippy::too_many_arguments)]
    pub fn derive_rekey(
        prf_alg: PrfAlgorithm,
        old_sk_d: &[u8],
        nonce_i: &[u8],
        nonce_r: &[u8],
        shared_secret: &[u8],
        spi_i: &[u8; 8],
        spi_r: &[u8; 8],
        encr_key_len: usize,
        integ_key_len: usize,
    ) -> Result<Self> {
        if old_sk_d.is_empty() {
            return Err(Error::Internal("Old SK_d not available for rekey".into()));
        }

        let mut data = Vec::new();
        data.extend_from_slice(shared_secret);
        data.extend_from_slice(nonce_i);
        data.extend_from_slice(nonce_r);

        let skeyseed = prf_alg.compute(old_sk_d, &data);

        Ok(Self::split(
            prf_alg,
            &skeyseed,
            nonce_i,
            nonce_r,
            spi_i,
            spi_r,
            encr_key_len,
            integ_key_len,
        ))
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.sk_d.zeroize();
        self.sk_ai.zeroize();
        self.sk_ar.zeroize();
        self.sk_ei.zeroize();
        self.sk_er.zeroize();
        self.sk_pi.zeroize();
        self.sk_pr.zeroize();
    }
}

/// Keying material for one child SA pair (RFC 7296 Section 2.17)
#[derive(Debug, Clone)]
pub struct ChildKeyMaterial {
    /// Initiator-to-responder encryption key
    pub sk_ei: Vec<u8>,
    /// Initiator-to-responder integrity key (empty for AEAD)
    pub sk_ai: Vec<u8>,
    /// Responder-to-initiator encryption key
    pub sk_er: Vec<u8>,
    /// Responder-to-initiator integrity key (empty for AEAD)
    pub sk_ar: Vec<u8>,
}

impl ChildKeyMaterial {
    /// Derive child SA keys: KEYMAT = prf+(SK_d, Ni | Nr), split
    /// SK_ei | SK_ai | SK_er | SK_ar.
    pub fn derive(
        prf_alg: PrfAlgorithm,
        sk_d: &[u8],
        nonce_i: &[u8],
        nonce_r: &[u8],
        encr_key_len: usize,
        integ_key_len: usize,
    ) -> Self {
        let mut seed = Vec::new();
        seed.extend_from_slice(nonce_i);
        seed.extend_from_slice(nonce_r);

        let total = 2 * encr_key_len + 2 * integ_key_len;
        let keymat = prf_alg.prf_plus(sk_d, &seed, total);

        let mut offset = 0;
        let mut take = |len: usize| {
            let part = keymat[offset..offset + len].to_vec();
            offset += len;
            part
        };

        ChildKeyMaterial {
            sk_ei: take(encr_key_len),
            sk_ai: take(integ_key_len),
            sk_er: take(encr_key_len),
            sk_ar: take(integ_key_len),
        }
    }
}

impl Drop for ChildKeyMaterial {
    fn drop(&mut self) {
        self.sk_ei.zeroize();
        self.sk_ai.zeroize();
        self.sk_er.zeroize();
        self.sk_ar.zeroize();
    }
}
