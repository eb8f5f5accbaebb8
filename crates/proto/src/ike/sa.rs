//! IKE SA records
//!
//! One [`IkeSaRecord`] holds everything scoped to a single IKE SA: the SPI
//! pair, the creation nonces, the derived key schedule, and the message-ID
//! counters for both directions. Records are created when an IKE_SA_INIT
//! completes or a rekey produces a replacement SA, and their SPI
//! reservations are released when they drop.
//!
//! During a simultaneous rekey both peers must independently pick the same
//! surviving SA; the tie-break is the lexicographic comparison of each
//! candidate's concatenated creation nonces (RFC 7296 Section 2.8.1).

use super::crypto::{CipherAlgorithm, IntegAlgorithm, KeyMaterial, PrfAlgorithm};
use super::message::{IkeMessage, SkCrypto};
use super::proposal::{
    DhTransformId, EncrTransformId, IntegTransformId, PrfTransformId, Proposal, TransformType,
};
use super::spi::IkeSpi;
use crate::ike::{Error, Result};
use std::cmp::Ordering;

/// The algorithm suite negotiated for one SA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedAlgorithms {
    /// SK payload cipher
    pub cipher: CipherAlgorithm,
    /// Integrity algorithm; `None` for combined-mode ciphers
    pub integ: Option<IntegAlgorithm>,
    /// PRF for key derivation
    pub prf: PrfAlgorithm,
    /// Negotiated DH group transform ID
    pub dh_group: u16,
}

impl NegotiatedAlgorithms {
    /// Resolve a selected proposal into concrete algorithms.
    pub fn from_proposal(proposal: &Proposal) -> Result<Self> {
        let encr = proposal
            .get_transform(TransformType::Encr)
            .ok_or_else(|| Error::NoProposalChosen)?;

        let cipher = match EncrTransformId::from_u16(encr.transform_id) {
            Some(EncrTransformId::AesCbc) => match encr.key_length_bits() {
                Some(128) => CipherAlgorithm::AesCbc128,
                Some(256) => CipherAlgorithm::AesCbc256,
                _ => return Err(Error::NoProposalChosen),
            },
            Some(EncrTransformId::AesGcm16) => match encr.key_length_bits() {
                Some(128) => CipherAlgorithm::AesGcm128,
                Some(256) => CipherAlgorithm::AesGcm256,
                _ => return Err(Error::NoProposalChosen),
            },
            Some(EncrTransformId::ChaCha20Poly1305) => CipherAlgorithm::ChaCha20Poly1305,
            None => return Err(Error::NoProposalChosen),
        };

        let integ = match proposal.get_transform(TransformType::Integ) {
            None => None,
            Some(t) => match IntegTransformId::from_u16(t.transform_id) {
                Some(IntegTransformId::None) => None,
                Some(IntegTransformId::HmacSha1_96) => Some(IntegAlgorithm::HmacSha1_96),
                Some(IntegTransformId::HmacSha256_128) => Some(IntegAlgorithm::HmacSha256_128),
                Some(IntegTransformId::HmacSha384_192) => Some(IntegAlgorithm::HmacSha384_192),
                Some(IntegTransformId::HmacSha512_256) => Some(IntegAlgorithm::HmacSha512_256),
                None => return Err(Error::NoProposalChosen),
            },
        };

        if cipher.is_aead() != integ.is_none() {
            return Err(Error::NoProposalChosen);
        }

        let prf = match proposal
            .get_transform(TransformType::Prf)
            .and_then(|t| PrfTransformId::from_u16(t.transform_id))
        {
            Some(PrfTransformId::HmacSha1) => PrfAlgorithm::HmacSha1,
            Some(PrfTransformId::HmacSha256) => PrfAlgorithm::HmacSha256,
            Some(PrfTransformId::HmacSha384) => PrfAlgorithm::HmacSha384,
            Some(PrfTransformId::HmacSha512) => PrfAlgorithm::HmacSha512,
            None => return Err(Error::NoProposalChosen),
        };

        let dh_group = proposal
            .get_transform(TransformType::Dh)
            .and_then(|t| DhTransformId::from_u16(t.transform_id))
            .map(|id| id.to_u16())
            .ok_or(Error::NoProposalChosen)?;

        Ok(NegotiatedAlgorithms {
            cipher,
            integ,
            prf,
            dh_group,
        })
    }

    /// Resolve a child (ESP) proposal into its cipher suite. Child
    /// proposals carry no PRF or DH transform.
    pub fn from_child_proposal(
        proposal: &Proposal,
    ) -> Result<(CipherAlgorithm, Option<IntegAlgorithm>)> {
        let encr = proposal
            .get_transform(TransformType::Encr)
            .ok_or_else(|| Error::NoProposalChosen)?;

        let cipher = match EncrTransformId::from_u16(encr.transform_id) {
            Some(EncrTransformId::AesCbc) => match encr.key_length_bits() {
                Some(128) => CipherAlgorithm::AesCbc128,
                Some(256) => CipherAlgorithm::AesCbc256,
                _ => return Err(Error::NoProposalChosen),
            },
            Some(EncrTransformId::AesGcm16) => match encr.key_length_bits() {
                Some(128) => CipherAlgorithm::AesGcm128,
                Some(256) => CipherAlgorithm::AesGcm256,
                _ => return Err(Error::NoProposalChosen),
            },
            Some(EncrTransformId::ChaCha20Poly1305) => CipherAlgorithm::ChaCha20Poly1305,
            None => return Err(Error::NoProposalChosen),
        };

        let integ = match proposal.get_transform(TransformType::Integ) {
            None => None,
            Some(t) => match IntegTransformId::from_u16(t.transform_id) {
                Some(IntegTransformId::None) => None,
                Some(IntegTransformId::HmacSha1_96) => Some(IntegAlgorithm::HmacSha1_96),
                Some(IntegTransformId::HmacSha256_128) => Some(IntegAlgorithm::HmacSha256_128),
                Some(IntegTransformId::HmacSha384_192) => Some(IntegAlgorithm::HmacSha384_192),
                Some(IntegTransformId::HmacSha512_256) => Some(IntegAlgorithm::HmacSha512_256),
                None => return Err(Error::NoProposalChosen),
            },
        };

        if cipher.is_aead() != integ.is_none() {
            return Err(Error::NoProposalChosen);
        }

        Ok((cipher, integ))
    }

    /// Encryption key length in bytes
    pub fn encr_key_len(&self) -> usize {
        self.cipher.key_len()
    }

    /// Integrity key length in bytes (0 for combined-mode)
    pub fn integ_key_len(&self) -> usize {
        self.integ.map(|i| i.key_len()).unwrap_or(0)
    }
}

/// State for one IKE SA
#[derive(Debug)]
pub struct IkeSaRecord {
    /// Our SPI reservation
    pub local_spi: IkeSpi,

    /// The peer's SPI reservation
    pub remote_spi: IkeSpi,

    /// Whether we were the initiator when this SA was created. A rekey
    /// started by the peer makes us the responder on the replacement SA.
    pub local_is_initiator: bool,

    /// Initiator nonce from this SA's creation
    pub nonce_i: Vec<u8>,

    /// Responder nonce from this SA's creation
    pub nonce_r: Vec<u8>,

    /// The proposal both sides agreed on
    pub proposal: Proposal,

    /// Resolved algorithm suite
    pub algorithms: NegotiatedAlgorithms,

    /// Derived key schedule
    pub keys: KeyMaterial,

    /// SPI pair of the SA this one replaced, if created by rekey
    pub parent_spis: Option<(u64, u64)>,

    next_request_id: u32,
    outstanding_request: Option<u32>,
    expected_request_id: u32,
}

impl IkeSaRecord {
    /// Create a record for a freshly negotiated SA.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_spi: IkeSpi,
        remote_spi: IkeSpi,
        local_is_initiator: bool,
        nonce_i: Vec<u8>,
        nonce_r: Vec<u8>,
        proposal: Proposal,
        keys: KeyMaterial,
        parent_spis: Option<(u64, u64)>,
    ) -> Result<Self> {
        let algorithms = NegotiatedAlgorithms::from_proposal(&proposal)?;

        Ok(IkeSaRecord {
            local_spi,
            remote_spi,
            local_is_initiator,
            nonce_i,
            nonce_r,
            proposal,
            algorithms,
            keys,
            parent_spis,
            next_request_id: 0,
            outstanding_request: None,
            expected_request_id: 0,
        })
    }

    /// The (initiator SPI, responder SPI) pair identifying this SA
    pub fn spi_pair(&self) -> (u64, u64) {
        if self.local_is_initiator {
            (self.local_spi.value(), self.remote_spi.value())
        } else {
            (self.remote_spi.value(), self.local_spi.value())
        }
    }

    /// The initiator SPI as wire bytes
    pub fn initiator_spi_bytes(&self) -> [u8; 8] {
        self.spi_pair().0.to_be_bytes()
    }

    /// The responder SPI as wire bytes
    pub fn responder_spi_bytes(&self) -> [u8; 8] {
        self.spi_pair().1.to_be_bytes()
    }

    /// Allocate the message ID for the next outbound request
    /// (post-increment). At most one request may be outstanding.
    pub fn next_message_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        self.outstanding_request = Some(id);
        id
    }

    /// Message ID of the request awaiting a response, if any
    pub fn outstanding_request_id(&self) -> Option<u32> {
        self.outstanding_request
    }

    /// Record a received message ID, rejecting replays and mismatches.
    ///
    /// Inbound requests must arrive strictly in order; inbound responses
    /// must match the outstanding request exactly.
    pub fn record_received(&mut self, id: u32, is_request: bool) -> Result<()> {
        if is_request {
            if id != self.expected_request_id {
                return Err(Error::InvalidMessageId {
                    expected: self.expected_request_id,
                    received: id,
                });
            }
            self.expected_request_id += 1;
            Ok(())
        } else {
            match self.outstanding_request {
                Some(expected) if expected == id => {
                    self.outstanding_request = None;
                    Ok(())
                }
                Some(expected) => Err(Error::InvalidMessageId {
                    expected,
                    received: id,
                }),
                None => Err(Error::InvalidMessageId {
                    expected: self.next_request_id,
                    received: id,
                }),
            }
        }
    }

    /// Compare this SA against a rekey rival by concatenated creation
    /// nonces; the greater SA survives a simultaneous rekey.
    pub fn compare_nonces(&self, other: &IkeSaRecord) -> Ordering {
        let mine: Vec<u8> = self
            .nonce_i
            .iter()
            .chain(self.nonce_r.iter())
            .copied()
            .collect();
        let theirs: Vec<u8> = other
            .nonce_i
            .iter()
            .chain(other.nonce_r.iter())
            .copied()
            .collect();
        mine.cmp(&theirs)
    }

    fn outbound_crypto(&self) -> SkCrypto<'_> {
        if self.local_is_initiator {
            SkCrypto {
                cipher: self.algorithms.cipher,
                integ: self.algorithms.integ,
                encryption_key: &self.keys.sk_ei,
                integrity_key: &self.keys.sk_ai,
            }
        } else {
            SkCrypto {
                cipher: self.algorithms.cipher,
                integ: self.algorithms.integ,
                encryption_key: &self.keys.sk_er,
                integrity_key: &self.keys.sk_ar,
            }
        }
    }

    fn inbound_crypto(&self) -> SkCrypto<'_> {
        if self.local_is_initiator {
            SkCrypto {
                cipher: self.algorithms.cipher,
                integ: self.algorithms.integ,
                encryption_key: &self.keys.sk_er,
                integrity_key: &self.keys.sk_ar,
            }
        } else {
            SkCrypto {
                cipher: self.algorithms.cipher,
                integ: self.algorithms.integ,
                encryption_key: &self.keys.sk_ei,
                integrity_key: &self.keys.sk_ai,
            }
        }
    }

    /// Build a message header for this SA.
    pub fn header(
        &self,
        exchange_type: crate::ike::constants::ExchangeType,
        message_id: u32,
        is_response: bool,
    ) -> crate::ike::message::IkeHeader {
        use crate::ike::constants::{IkeFlags, PayloadType};

        crate::ike::message::IkeHeader::new(
            self.initiator_spi_bytes(),
            self.responder_spi_bytes(),
            PayloadType::SK.to_u8(),
            exchange_type,
            if is_response {
                IkeFlags::response(self.local_is_initiator)
            } else {
                IkeFlags::request(self.local_is_initiator)
            },
            message_id,
            0,
        )
    }

    /// Seal an outbound message under this SA's keys.
    pub fn encrypt_and_encode(&self, message: &IkeMessage) -> Result<Vec<u8>> {
        message.encode_encrypted(&self.outbound_crypto())
    }

    /// Open an inbound protected message under this SA's keys.
    pub fn decode_and_decrypt(&self, bytes: &[u8]) -> Result<IkeMessage> {
        IkeMessage::decode_encrypted(bytes, &self.inbound_crypto())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ike::constants::{ExchangeType, IkeFlags, NotifyType};
    use crate::ike::message::IkeHeader;
    use crate::ike::payload::{IkePayload, NotifyPayload};
    use crate::ike::proposal::Transform;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
    }

    fn aead_proposal() -> Proposal {
        Proposal::new(1, super::super::proposal::ProtocolId::Ike)
            .add_transform(Transform::encr_with_key_len(EncrTransformId::AesGcm16, 128))
            .add_transform(Transform::prf(PrfTransformId::HmacSha256))
            .add_transform(Transform::dh(DhTransformId::Group14))
    }

    fn make_record(addr_octet: u8, nonce_i: Vec<u8>, nonce_r: Vec<u8>) -> IkeSaRecord {
        let addr = test_addr(addr_octet);
        let local = IkeSpi::allocate(addr).unwrap();
        let remote = IkeSpi::allocate(addr).unwrap();

        let keys = KeyMaterial::derive(
            PrfAlgorithm::HmacSha256,
            &nonce_i,
            &nonce_r,
            &[0x33; 32],
            &local.to_bytes(),
            &remote.to_bytes(),
            16,
            0,
        )
        .unwrap();

        IkeSaRecord::new(local, remote, true, nonce_i, nonce_r, aead_proposal(), keys, None)
            .unwrap()
    }

    #[test]
    fn test_negotiated_algorithms_from_proposal() {
        let algs = NegotiatedAlgorithms::from_proposal(&aead_proposal()).unwrap();
        assert_eq!(algs.cipher, CipherAlgorithm::AesGcm128);
        assert!(algs.integ.is_none());
        assert_eq!(algs.prf, PrfAlgorithm::HmacSha256);
        assert_eq!(algs.dh_group, 14);
        assert_eq!(algs.encr_key_len(), 16);
        assert_eq!(algs.integ_key_len(), 0);
    }

    #[test]
    fn test_negotiated_algorithms_classic_suite() {
        let proposal = Proposal::new(1, super::super::proposal::ProtocolId::Ike)
            .add_transform(Transform::encr_with_key_len(EncrTransformId::AesCbc, 256))
            .add_transform(Transform::integ(IntegTransformId::HmacSha256_128))
            .add_transform(Transform::prf(PrfTransformId::HmacSha512))
            .add_transform(Transform::dh(DhTransformId::Group31));

        let algs = NegotiatedAlgorithms::from_proposal(&proposal).unwrap();
        assert_eq!(algs.cipher, CipherAlgorithm::AesCbc256);
        assert_eq!(algs.integ, Some(IntegAlgorithm::HmacSha256_128));
        assert_eq!(algs.integ_key_len(), 32);
    }

    #[test]
    fn test_classic_cipher_without_integrity_rejected() {
        let proposal = Proposal::new(1, super::super::proposal::ProtocolId::Ike)
            .add_transform(Transform::encr_with_key_len(EncrTransformId::AesCbc, 128))
            .add_transform(Transform::prf(PrfTransformId::HmacSha256))
            .add_transform(Transform::dh(DhTransformId::Group14));

        assert!(matches!(
            NegotiatedAlgorithms::from_proposal(&proposal),
            Err(Error::NoProposalChosen)
        ));
    }

    #[test]
    fn test_message_id_post_increment() {
        let mut sa = make_record(10, vec![0x01; 32], vec![0x02; 32]);

        assert_eq!(sa.next_message_id(), 0);
        assert_eq!(sa.outstanding_request_id(), Some(0));
        assert!(sa.record_received(0, false).is_ok());
        assert_eq!(sa.outstanding_request_id(), None);

        assert_eq!(sa.next_message_id(), 1);
        assert_eq!(sa.next_message_id(), 2);
    }

    #[test]
    fn test_response_id_must_match_outstanding() {
        let mut sa = make_record(11, vec![0x01; 32], vec![0x02; 32]);

        let id = sa.next_message_id();
        let result = sa.record_received(id + 5, false);
        assert!(matches!(result, Err(Error::InvalidMessageId { .. })));

        // Unsolicited response
        assert!(sa.record_received(id, false).is_ok());
        assert!(sa.record_received(id, false).is_err());
    }

    #[test]
    fn test_request_replay_rejected() {
        let mut sa = make_record(12, vec![0x01; 32], vec![0x02; 32]);

        assert!(sa.record_received(0, true).is_ok());
        assert!(sa.record_received(1, true).is_ok());

        // Duplicate and out-of-window requests rejected
        assert!(matches!(
            sa.record_received(1, true),
            Err(Error::InvalidMessageId { .. })
        ));
        assert!(matches!(
            sa.record_received(5, true),
            Err(Error::InvalidMessageId { .. })
        ));
    }

    #[test]
    fn test_nonce_ordering() {
        let low = make_record(13, vec![0x01; 32], vec![0x02; 32]);
        let high = make_record(14, vec![0xF0; 32], vec![0x02; 32]);

        assert_eq!(low.compare_nonces(&high), Ordering::Less);
        assert_eq!(high.compare_nonces(&low), Ordering::Greater);
        assert_eq!(low.compare_nonces(&low), Ordering::Equal);

        // Tie on nonce_i is broken by nonce_r
        let a = make_record(15, vec![0x05; 32], vec![0x01; 32]);
        let b = make_record(16, vec![0x05; 32], vec![0x09; 32]);
        assert_eq!(a.compare_nonces(&b), Ordering::Less);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip_between_peers() {
        let sa = make_record(17, vec![0x01; 32], vec![0x02; 32]);

        let header = IkeHeader::new(
            sa.local_spi.to_bytes(),
            sa.remote_spi.to_bytes(),
            0,
            ExchangeType::Informational,
            IkeFlags::request(true),
            2,
            0,
        );
        let message = IkeMessage::new(
            header,
            vec![IkePayload::Notify(NotifyPayload::new(
                NotifyType::InitialContact,
                Vec::new(),
            ))],
        );

        let wire = sa.encrypt_and_encode(&message).unwrap();

        // The peer holds the same keys but acts as the responder
        let addr = test_addr(18);
        let peer = IkeSaRecord::new(
            IkeSpi::allocate(addr).unwrap(),
            IkeSpi::allocate(addr).unwrap(),
            false,
            sa.nonce_i.clone(),
            sa.nonce_r.clone(),
            sa.proposal.clone(),
            sa.keys.clone(),
            None,
        )
        .unwrap();

        let opened = peer.decode_and_decrypt(&wire).unwrap();
        assert_eq!(opened.payloads, message.payloads);
    }

    #[test]
    fn test_responder_role_spi_pair() {
        let addr = test_addr(19);
        let local = IkeSpi::allocate(addr).unwrap();
        let remote = IkeSpi::allocate(addr).unwrap();
        let local_value = local.value();
        let remote_value = remote.value();

        let keys = KeyMaterial::derive(
            PrfAlgorithm::HmacSha256,
            &[0x01; 32],
            &[0x02; 32],
            &[0x33; 32],
            &local.to_bytes(),
            &remote.to_bytes(),
            16,
            0,
        )
        .unwrap();

        let sa = IkeSaRecord::new(
            local,
            remote,
            false,
            vec![0x01; 32],
            vec![0x02; 32],
            aead_proposal(),
            keys,
            None,
        )
        .unwrap();

        // The peer initiated, so its SPI leads the pair
        assert_eq!(sa.spi_pair(), (remote_value, local_value));
    }
}
