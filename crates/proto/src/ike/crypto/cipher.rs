//! Cipher implementations for the IKEv2 Encrypted (SK) payload
//!
//! Implements both combined-mode (AEAD) ciphers and AES-CBC for classic
//! encrypt-then-MAC framing, as defined in RFC 7296 Section 3.14.

use crate::ike::{Error, Result};
use aes::{Aes128, Aes256};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Aes256Gcm, Nonce as AesGcmNonce,
};
use cbc::{Decryptor, Encryptor};
use cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = Encryptor<Aes128>;
type Aes128CbcDec = Decryptor<Aes128>;
type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

/// Cipher algorithm for SK payload encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES-CBC with 128-bit key (requires a separate integrity algorithm)
    AesCbc128,
    /// AES-CBC with 256-bit key (requires a separate integrity algorithm)
    AesCbc256,
    /// AES-GCM with 128-bit key (AEAD)
    AesGcm128,
    /// AES-GCM with 256-bit key (AEAD)
    AesGcm256,
    /// ChaCha20-Poly1305 (AEAD)
    ChaCha20Poly1305,
}

impl CipherAlgorithm {
    /// Get key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            CipherAlgorithm::AesCbc128 | CipherAlgorithm::AesGcm128 => 16,
            CipherAlgorithm::AesCbc256
            | CipherAlgorithm::AesGcm256
            | CipherAlgorithm::ChaCha20Poly1305 => 32,
        }
    }

    /// Get IV length in bytes as carried in the SK payload
    pub fn iv_len(self) -> usize {
        match self {
            CipherAlgorithm::AesCbc128 | CipherAlgorithm::AesCbc256 => 16,
            // 8-byte explicit IV, implicit fixed field zero (RFC 4106)
            CipherAlgorithm::AesGcm128 | CipherAlgorithm::AesGcm256 => 8,
            CipherAlgorithm::ChaCha20Poly1305 => 12, // RFC 7539
        }
    }

    /// Get authentication tag length in bytes (0 for classic ciphers)
    pub fn tag_len(self) -> usize {
        if self.is_aead() {
            16
        } else {
            0
        }
    }

    /// Cipher block size used for SK payload padding
    pub fn block_size(self) -> usize {
        match self {
            CipherAlgorithm::AesCbc128 | CipherAlgorithm::AesCbc256 => 16,
            // AEAD ciphers need no block alignment; pad to 4 for tidiness
            _ => 4,
        }
    }

    /// Check if this is a combined-mode cipher
    pub fn is_aead(self) -> bool {
        matches!(
            self,
            CipherAlgorithm::AesGcm128
                | CipherAlgorithm::AesGcm256
                | CipherAlgorithm::ChaCha20Poly1305
        )
    }

    fn check_lengths(self, key: &[u8], iv: &[u8]) -> Result<()> {
        if key.len() != self.key_len() {
            return Err(Error::InvalidKeyLength {
                expected: self.key_len(),
                actual: key.len(),
            });
        }
        if iv.len() != self.iv_len() {
            return Err(Error::CryptoError(format!(
                "IV length {} does not match cipher (need {})",
                iv.len(),
                self.iv_len()
            )));
        }
        Ok(())
    }

    /// Encrypt with an AEAD cipher; the tag is appended to the ciphertext.
    ///
    /// Fails on classic (non-AEAD) ciphers; use [`encrypt_cbc`].
    ///
    /// [`encrypt_cbc`]: CipherAlgorithm::encrypt_cbc
    pub fn encrypt_aead(
        self,
        key: &[u8],
        iv: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        self.check_lengths(key, iv)?;

        let payload = Payload {
            msg: plaintext,
            aad,
        };

        match self {
            CipherAlgorithm::AesGcm128 => {
                let cipher = Aes128Gcm::new_from_slice(key)
                    .map_err(|_| Error::CryptoError("Failed to create AES-GCM cipher".into()))?;
                let mut nonce_bytes = [0u8; 12];
                nonce_bytes[..8].copy_from_slice(iv);
                cipher
                    .encrypt(AesGcmNonce::from_slice(&nonce_bytes), payload)
                    .map_err(|_| Error::CryptoError("AES-GCM encryption failed".into()))
            }
            CipherAlgorithm::AesGcm256 => {
                let cipher = Aes256Gcm::new_from_slice(key)
                    .map_err(|_| Error::CryptoError("Failed to create AES-GCM cipher".into()))?;
                let mut nonce_bytes = [0u8; 12];
                nonce_bytes[..8].copy_from_slice(iv);
                cipher
                    .encrypt(AesGcmNonce::from_slice(&nonce_bytes), payload)
                    .map_err(|_| Error::CryptoError("AES-GCM encryption failed".into()))
            }
            CipherAlgorithm::ChaCha20Poly1305 => {
                let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
                    .map_err(|_| Error::CryptoError("Failed to create ChaCha20 cipher".into()))?;
                cipher
                    .encrypt(chacha20poly1305::Nonce::from_slice(iv), payload)
                    .map_err(|_| Error::CryptoError("ChaCha20-Poly1305 encryption failed".into()))
            }
            _ => Err(Error::CryptoError(
                "encrypt_aead called on a classic cipher".into(),
            )),
        }
    }

    /// Decrypt with an AEAD cipher; `ciphertext` includes the tag.
    pub fn decrypt_aead(
        self,
        key: &[u8],
        iv: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        self.check_lengths(key, iv)?;

        if ciphertext.len() < self.tag_len() {
            return Err(Error::BufferTooShort {
                required: self.tag_len(),
                available: ciphertext.len(),
            });
        }

        let payload = Payload {
            msg: ciphertext,
            aad,
        };

        let result = match self {
            CipherAlgorithm::AesGcm128 => {
                let cipher = Aes128Gcm::new_from_slice(key)
                    .map_err(|_| Error::CryptoError("Failed to create AES-GCM cipher".into()))?;
                let mut nonce_bytes = [0u8; 12];
                nonce_bytes[..8].copy_from_slice(iv);
                cipher.decrypt(AesGcmNonce::from_slice(&nonce_bytes), payload)
            }
            CipherAlgorithm::AesGcm256 => {
                let cipher = Aes256Gcm::new_from_slice(key)
                    .map_err(|_| Error::CryptoError("Failed to create AES-GCM cipher".into()))?;
                let mut nonce_bytes = [0u8; 12];
                nonce_bytes[..8].copy_from_slice(iv);
                cipher.decrypt(AesGcmNonce::from_slice(&nonce_bytes), payload)
            }
            CipherAlgorithm::ChaCha20Poly1305 => {
                let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
                    .map_err(|_| Error::CryptoError("Failed to create ChaCha20 cipher".into()))?;
                cipher.decrypt(chacha20poly1305::Nonce::from_slice(iv), payload)
            }
            _ => {
                return Err(Error::CryptoError(
                    "decrypt_aead called on a classic cipher".into(),
                ))
            }
        };

        result.map_err(|_| Error::IntegrityCheckFailed)
    }

    /// Encrypt with AES-CBC. The plaintext must already be padded to the
    /// cipher block size (the SK payload carries its own pad-length byte).
    pub fn encrypt_cbc(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_lengths(key, iv)?;

        if plaintext.len() % self.block_size() != 0 {
            return Err(Error::CryptoError(
                "CBC plaintext is not block-aligned".into(),
            ));
        }

        match self {
            CipherAlgorithm::AesCbc128 => {
                let enc = Aes128CbcEnc::new_from_slices(key, iv)
                    .map_err(|_| Error::CryptoError("Failed to create AES-CBC cipher".into()))?;
                Ok(enc.encrypt_padded_vec_mut::<NoPadding>(plaintext))
            }
            CipherAlgorithm::AesCbc256 => {
                let enc = Aes256CbcEnc::new_from_slices(key, iv)
                    .map_err(|_| Error::CryptoError("Failed to create AES-CBC cipher".into()))?;
                Ok(enc.encrypt_padded_vec_mut::<NoPadding>(plaintext))
            }
            _ => Err(Error::CryptoError(
                "encrypt_cbc called on an AEAD cipher".into(),
            )),
        }
    }

    /// Decrypt with AES-CBC.
    pub fn decrypt_cbc(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_lengths(key, iv)?;

        if ciphertext.is_empty() || ciphertext.len() % self.block_size() != 0 {
            return Err(Error::CryptoError(
                "CBC ciphertext is not block-aligned".into(),
            ));
        }

        match self {
            CipherAlgorithm::AesCbc128 => {
                let dec = Aes128CbcDec::new_from_slices(key, iv)
                    .map_err(|_| Error::CryptoError("Failed to create AES-CBC cipher".into()))?;
                dec.decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                    .map_err(|_| Error::CryptoError("AES-CBC decryption failed".into()))
            }
            CipherAlgorithm::AesCbc256 => {
                let dec = Aes256CbcDec::new_from_slices(key, iv)
                    .map_err(|_| Error::CryptoError("Failed to create AES-CBC cipher".into()))?;
                dec.decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                    .map_err(|_| Error::CryptoError("AES-CBC decryption failed".into()))
            }
            _ => Err(Error::CryptoError(
                "decrypt_cbc called on an AEAD cipher".into(),
            )),
        }
    }
}
