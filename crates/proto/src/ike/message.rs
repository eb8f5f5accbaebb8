//! IKEv2 message structures and parsing
//!
//! Implements the IKE message format defined in RFC 7296 Section 3.1 and
//! the Encrypted-payload framing of Section 3.14.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       IKE SA Initiator's SPI                  |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       IKE SA Responder's SPI                  |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Next Payload | MjVer | MnVer | Exchange Type |     Flags     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Message ID                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Length                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use super::constants::*;
use super::crypto::{CipherAlgorithm, IntegAlgorithm};
use super::payload::{
    encode_payload_chain, parse_payload_chain, EncryptedPayload, IkePayload, PayloadHeader,
};
use crate::ike::{Error, Result};
use rand::RngCore;

/// IKE message header (28 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkeHeader {
    /// Initiator's Security Parameter Index (8 bytes)
    pub initiator_spi: [u8; 8],

    /// Responder's Security Parameter Index (8 bytes, zero in the first
    /// IKE_SA_INIT request)
    pub responder_spi: [u8; 8],

    /// Type code of the first payload
    pub next_payload: u8,

    /// Protocol version (0x20 for IKEv2)
    pub version: u8,

    /// Exchange type
    pub exchange_type: ExchangeType,

    /// Message flags
    pub flags: IkeFlags,

    /// Message ID (replay protection and request/response matching)
    pub message_id: u32,

    /// Total message length in bytes (including header)
    pub length: u32,
}

impl IkeHeader {
    /// Create a new IKE header
    pub fn new(
        initiator_spi: [u8; 8],
        responder_spi: [u8; 8],
        next_payload: u8,
        exchange_type: ExchangeType,
        flags: IkeFlags,
        message_id: u32,
        length: u32,
    ) -> Self {
        IkeHeader {
            initiator_spi,
            responder_spi,
            next_payload,
            version: IKE_VERSION,
            exchange_type,
            flags,
            message_id,
            length,
        }
    }

    /// Parse IKE header from bytes
    ///
    /// # Errors
    ///
    /// - `BufferTooShort` below 28 bytes
    /// - `InvalidMajorVersion` when the major version nibble is not 2
    /// - `UnsupportedExchangeType` for an unknown exchange type
    /// - `InvalidSyntax`/`MessageTooLarge` for a bad length field
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < IKE_HEADER_SIZE {
            return Err(Error::BufferTooShort {
                required: IKE_HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut initiator_spi = [0u8; 8];
        let mut responder_spi = [0u8; 8];
        initiator_spi.copy_from_slice(&data[0..8]);
        responder_spi.copy_from_slice(&data[8..16]);

        let next_payload = data[16];

        let version = data[17];
        if version & IKE_MAJOR_VERSION_MASK != IKE_VERSION {
            return Err(Error::InvalidMajorVersion(version));
        }

        let exchange_type = ExchangeType::from_u8(data[18])
            .ok_or(Error::UnsupportedExchangeType(data[18]))?;

        let flags = IkeFlags::new(data[19]);
        let message_id = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        let length = u32::from_be_bytes([data[24], data[25], data[26], data[27]]);

        if length > MAX_IKE_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge(length));
        }
        if (length as usize) < IKE_HEADER_SIZE {
            return Err(Error::InvalidSyntax(format!(
                "Header length {} below header size",
                length
            )));
        }

        Ok(IkeHeader {
            initiator_spi,
            responder_spi,
            next_payload,
            version,
            exchange_type,
            flags,
            message_id,
            length,
        })
    }

    /// Serialize IKE header to bytes
    pub fn to_bytes(&self) -> [u8; IKE_HEADER_SIZE] {
        let mut bytes = [0u8; IKE_HEADER_SIZE];

        bytes[0..8].copy_from_slice(&self.initiator_spi);
        bytes[8..16].copy_from_slice(&self.responder_spi);
        bytes[16] = self.next_payload;
        bytes[17] = self.version;
        bytes[18] = self.exchange_type.to_u8();
        bytes[19] = self.flags.value();
        bytes[20..24].copy_from_slice(&self.message_id.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.length.to_be_bytes());

        bytes
    }
}

/// A decoded IKE message: header plus ordered payload list
#[derive(Debug, Clone, PartialEq)]
pub struct IkeMessage {
    /// Message header
    pub header: IkeHeader,

    /// Ordered payloads (decrypted, for encrypted messages)
    pub payloads: Vec<IkePayload>,
}

/// Algorithms and keys needed to seal or open an Encrypted payload
#[derive(Debug, Clone, Copy)]
pub struct SkCrypto<'a> {
    /// Negotiated cipher
    pub cipher: CipherAlgorithm,

    /// Negotiated integrity algorithm; `None` for combined-mode ciphers
    pub integ: Option<IntegAlgorithm>,

    /// SK_e key for this direction
    pub encryption_key: &'a [u8],

    /// SK_a key for this direction (empty for combined-mode)
    pub integrity_key: &'a [u8],
}

impl IkeMessage {
    /// Create a new message
    pub fn new(header: IkeHeader, payloads: Vec<IkePayload>) -> Self {
        IkeMessage { header, payloads }
    }

    /// Find the first payload matching `f`
    pub fn find<'a, T>(&'a self, f: impl Fn(&'a IkePayload) -> Option<&'a T>) -> Option<&'a T> {
        self.payloads.iter().find_map(f)
    }

    /// Encode an unprotected message (IKE_SA_INIT), computing the length
    /// field last.
    pub fn encode_plain(&self) -> Vec<u8> {
        let chain = encode_payload_chain(&self.payloads);

        let mut header = self.header.clone();
        header.next_payload = self
            .payloads
            .first()
            .map(|p| p.type_code())
            .unwrap_or_else(|| PayloadType::None.to_u8());
        header.length = (IKE_HEADER_SIZE + chain.len()) as u32;

        let mut out = Vec::with_capacity(header.length as usize);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&chain);
        out
    }

    /// Decode an unprotected message.
    pub fn decode_plain(data: &[u8]) -> Result<Self> {
        let header = IkeHeader::from_bytes(data)?;

        if header.length as usize != data.len() {
            return Err(Error::InvalidSyntax(format!(
                "Header length {} does not match datagram length {}",
                header.length,
                data.len()
            )));
        }

        let payloads = parse_payload_chain(header.next_payload, &data[IKE_HEADER_SIZE..])?;
        Ok(IkeMessage { header, payloads })
    }

    /// Encode this message with its payloads wrapped in an Encrypted
    /// payload (RFC 7296 Section 3.14).
    ///
    /// Framing: IV ‖ ciphertext (block-padded, trailing pad-length byte) ‖
    /// integrity checksum. For combined-mode ciphers the checksum field is
    /// absent and the AEAD tag follows the ciphertext; the associated data
    /// is everything preceding the IV. The length field is computed before
    /// sealing, and the classic checksum covers the full packet excluding
    /// the checksum bytes themselves.
    pub fn encode_encrypted(&self, crypto: &SkCrypto<'_>) -> Result<Vec<u8>> {
        let first_inner = self
            .payloads
            .first()
            .map(|p| p.type_code())
            .unwrap_or_else(|| PayloadType::None.to_u8());

        // Serialize and pad the inner chain
        let mut plaintext = encode_payload_chain(&self.payloads);
        let block = crypto.cipher.block_size();
        let pad_len = (block - ((plaintext.len() + 1) % block)) % block;
        plaintext.extend(std::iter::repeat(0u8).take(pad_len));
        plaintext.push(pad_len as u8);

        let iv_len = crypto.cipher.iv_len();
        let mut iv = vec![0u8; iv_len];
        rand::thread_rng().fill_bytes(&mut iv);

        let checksum_len = crypto.integ.map(|i| i.checksum_len()).unwrap_or(0);
        let ct_len = plaintext.len() + crypto.cipher.tag_len();
        let sk_body_len = iv_len + ct_len + checksum_len;

        // Length is known before sealing; fill the header now
        let mut header = self.header.clone();
        header.next_payload = PayloadType::SK.to_u8();
        header.length = (IKE_HEADER_SIZE + PayloadHeader::SIZE + sk_body_len) as u32;

        let sk_header = PayloadHeader::new(
            first_inner,
            false,
            (PayloadHeader::SIZE + sk_body_len) as u16,
        );

        let mut out = Vec::with_capacity(header.length as usize);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&sk_header.to_bytes());
        out.extend_from_slice(&iv);

        if crypto.cipher.is_aead() {
            // Associated data: everything preceding the IV
            let aad: Vec<u8> = out[..IKE_HEADER_SIZE + PayloadHeader::SIZE].to_vec();
            let ciphertext =
                crypto
                    .cipher
                    .encrypt_aead(crypto.encryption_key, &iv, &plaintext, &aad)?;
            out.extend_from_slice(&ciphertext);
        } else {
            let integ = crypto
                .integ
                .ok_or_else(|| Error::Internal("Classic cipher without integrity".into()))?;
            let ciphertext = crypto
                .cipher
                .encrypt_cbc(crypto.encryption_key, &iv, &plaintext)?;
            out.extend_from_slice(&ciphertext);

            // Checksum over the full packet excluding the checksum bytes
            let checksum = integ.compute(crypto.integrity_key, &out);
            out.extend_from_slice(&checksum);
        }

        Ok(out)
    }

    /// Decode and open an encrypted message.
    ///
    /// # Errors
    ///
    /// - `IntegrityCheckFailed` when the checksum or AEAD tag does not
    ///   verify
    /// - `InvalidSyntax` for framing violations
    pub fn decode_encrypted(data: &[u8], crypto: &SkCrypto<'_>) -> Result<Self> {
        let header = IkeHeader::from_bytes(data)?;

        if header.length as usize != data.len() {
            return Err(Error::InvalidSyntax(format!(
                "Header length {} does not match datagram length {}",
                header.length,
                data.len()
            )));
        }
        if header.next_payload != PayloadType::SK.to_u8() {
            return Err(Error::InvalidSyntax(
                "Protected message does not start with an Encrypted payload".into(),
            ));
        }

        let sk_header = PayloadHeader::from_bytes(&data[IKE_HEADER_SIZE..])?;
        let sk_end = IKE_HEADER_SIZE + sk_header.length as usize;
        if sk_end != data.len() {
            return Err(Error::InvalidSyntax(
                "Encrypted payload does not span the rest of the message".into(),
            ));
        }

        let body = EncryptedPayload {
            raw: data[IKE_HEADER_SIZE + PayloadHeader::SIZE..].to_vec(),
        };

        let iv_len = crypto.cipher.iv_len();
        let checksum_len = crypto.integ.map(|i| i.checksum_len()).unwrap_or(0);
        let (iv, ciphertext, checksum) = body.split(iv_len, checksum_len)?;

        let plaintext = if crypto.cipher.is_aead() {
            let aad = &data[..IKE_HEADER_SIZE + PayloadHeader::SIZE];
            crypto
                .cipher
                .decrypt_aead(crypto.encryption_key, iv, ciphertext, aad)?
        } else {
            let integ = crypto
                .integ
                .ok_or_else(|| Error::Internal("Classic cipher without integrity".into()))?;
            integ.verify(
                crypto.integrity_key,
                &data[..data.len() - checksum_len],
                checksum,
            )?;
            crypto
                .cipher
                .decrypt_cbc(crypto.encryption_key, iv, ciphertext)?
        };

        // Strip padding: trailing pad-length byte
        let pad_len = *plaintext
            .last()
            .ok_or_else(|| Error::InvalidSyntax("Empty decrypted payload".into()))?
            as usize;
        if pad_len + 1 > plaintext.len() {
            return Err(Error::InvalidSyntax("Invalid padding length".into()));
        }
        let inner = &plaintext[..plaintext.len() - pad_len - 1];

        let payloads = parse_payload_chain(sk_header.next_payload, inner)?;

        Ok(IkeMessage { header, payloads })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ike::payload::{KePayload, NoncePayload, NotifyPayload};

    fn sample_header(exchange: ExchangeType, next: u8) -> IkeHeader {
        IkeHeader::new(
            [1, 2, 3, 4, 5, 6, 7, 8],
            [9, 10, 11, 12, 13, 14, 15, 16],
            next,
            exchange,
            IkeFlags::request(true),
            42,
            0,
        )
    }

    #[test]
    fn test_header_roundtrip() {
        let mut header = sample_header(ExchangeType::IkeSaInit, PayloadType::SA.to_u8());
        header.length = 100;

        let bytes = header.to_bytes();
        let parsed = IkeHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn test_header_buffer_too_short() {
        let data = vec![0u8; 27];
        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::BufferTooShort { .. })));
    }

    #[test]
    fn test_header_invalid_major_version() {
        let mut header = sample_header(ExchangeType::IkeSaInit, 33);
        header.length = 28;
        let mut data = header.to_bytes();
        data[17] = 0x10; // major version 1

        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::InvalidMajorVersion(0x10))));
    }

    #[test]
    fn test_header_minor_version_tolerated() {
        let mut header = sample_header(ExchangeType::IkeSaInit, 33);
        header.length = 28;
        let mut data = header.to_bytes();
        data[17] = 0x21; // major 2, minor 1

        assert!(IkeHeader::from_bytes(&data).is_ok());
    }

    #[test]
    fn test_header_unknown_exchange_type() {
        let mut header = sample_header(ExchangeType::IkeSaInit, 33);
        header.length = 28;
        let mut data = header.to_bytes();
        data[18] = 99;

        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::UnsupportedExchangeType(99))));
    }

    #[test]
    fn test_header_message_too_large() {
        let mut header = sample_header(ExchangeType::IkeSaInit, 33);
        header.length = 28;
        let mut data = header.to_bytes();
        data[24..28].copy_from_slice(&70000u32.to_be_bytes());

        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::MessageTooLarge(70000))));
    }

    #[test]
    fn test_plain_message_roundtrip() {
        let message = IkeMessage::new(
            sample_header(ExchangeType::IkeSaInit, 0),
            vec![
                IkePayload::Ke(KePayload::new(14, vec![0xAB; 64])),
                IkePayload::Nonce(NoncePayload::new(vec![0xCD; 32]).unwrap()),
            ],
        );

        let encoded = message.encode_plain();
        let decoded = IkeMessage::decode_plain(&encoded).unwrap();

        assert_eq!(decoded.payloads, message.payloads);
        assert_eq!(decoded.header.length as usize, encoded.len());
        assert_eq!(decoded.header.next_payload, PayloadType::KE.to_u8());
    }

    #[test]
    fn test_plain_message_length_mismatch() {
        let message = IkeMessage::new(
            sample_header(ExchangeType::IkeSaInit, 0),
            vec![IkePayload::Nonce(NoncePayload::new(vec![0xCD; 32]).unwrap())],
        );

        let mut encoded = message.encode_plain();
        encoded.push(0);
        let result = IkeMessage::decode_plain(&encoded);
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    fn aead_crypto(key: &[u8]) -> SkCrypto<'_> {
        SkCrypto {
            cipher: CipherAlgorithm::AesGcm128,
            integ: None,
            encryption_key: key,
            integrity_key: &[],
        }
    }

    #[test]
    fn test_encrypted_roundtrip_aead() {
        let key = vec![0x42; 16];
        let message = IkeMessage::new(
            sample_header(ExchangeType::Informational, 0),
            vec![IkePayload::Notify(NotifyPayload::new(
                NotifyType::InitialContact,
                Vec::new(),
            ))],
        );

        let encoded = message.encode_encrypted(&aead_crypto(&key)).unwrap();
        let decoded = IkeMessage::decode_encrypted(&encoded, &aead_crypto(&key)).unwrap();
        assert_eq!(decoded.payloads, message.payloads);
    }

    #[test]
    fn test_encrypted_roundtrip_cbc_hmac() {
        let enc_key = vec![0x42; 16];
        let auth_key = vec![0x24; 32];
        let crypto = SkCrypto {
            cipher: CipherAlgorithm::AesCbc128,
            integ: Some(IntegAlgorithm::HmacSha256_128),
            encryption_key: &enc_key,
            integrity_key: &auth_key,
        };

        let message = IkeMessage::new(
            sample_header(ExchangeType::Informational, 0),
            vec![IkePayload::Notify(NotifyPayload::new(
                NotifyType::InitialContact,
                vec![1, 2, 3],
            ))],
        );

        let encoded = message.encode_encrypted(&crypto).unwrap();
        let decoded = IkeMessage::decode_encrypted(&encoded, &crypto).unwrap();
        assert_eq!(decoded.payloads, message.payloads);
    }

    #[test]
    fn test_encrypted_empty_payload_roundtrip() {
        let key = vec![0x42; 16];
        let message = IkeMessage::new(
            sample_header(ExchangeType::Informational, 0),
            Vec::new(),
        );

        let encoded = message.encode_encrypted(&aead_crypto(&key)).unwrap();
        let decoded = IkeMessage::decode_encrypted(&encoded, &aead_crypto(&key)).unwrap();
        assert!(decoded.payloads.is_empty());
    }

    #[test]
    fn test_encrypted_detects_tampering() {
        let key = vec![0x42; 16];
        let message = IkeMessage::new(
            sample_header(ExchangeType::Informational, 0),
            vec![IkePayload::Notify(NotifyPayload::new(
                NotifyType::InitialContact,
                Vec::new(),
            ))],
        );

        let mut encoded = message.encode_encrypted(&aead_crypto(&key)).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;

        let result = IkeMessage::decode_encrypted(&encoded, &aead_crypto(&key));
        assert!(matches!(result, Err(Error::IntegrityCheckFailed)));
    }

    #[test]
    fn test_encrypted_cbc_detects_checksum_tampering() {
        let enc_key = vec![0x42; 16];
        let auth_key = vec![0x24; 32];
        let crypto = SkCrypto {
            cipher: CipherAlgorithm::AesCbc128,
            integ: Some(IntegAlgorithm::HmacSha256_128),
            encryption_key: &enc_key,
            integrity_key: &auth_key,
        };

        let message = IkeMessage::new(
            sample_header(ExchangeType::Informational, 0),
            vec![IkePayload::Notify(NotifyPayload::new(
                NotifyType::InitialContact,
                Vec::new(),
            ))],
        );

        let mut encoded = message.encode_encrypted(&crypto).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let result = IkeMessage::decode_encrypted(&encoded, &crypto);
        assert!(matches!(result, Err(Error::IntegrityCheckFailed)));
    }

    #[test]
    fn test_encrypted_wrong_key_fails() {
        let key = vec![0x42; 16];
        let wrong = vec![0x43; 16];
        let message = IkeMessage::new(
            sample_header(ExchangeType::Informational, 0),
            Vec::new(),
        );

        let encoded = message.encode_encrypted(&aead_crypto(&key)).unwrap();
        let result = IkeMessage::decode_encrypted(&encoded, &aead_crypto(&wrong));
        assert!(matches!(result, Err(Error::IntegrityCheckFailed)));
    }
}
