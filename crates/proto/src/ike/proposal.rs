//! IKEv2 Proposal and Transform structures
//!
//! Implements SA proposal negotiation and the SA payload substructure codec
//! as defined in RFC 7296 Sections 3.3 and 2.7.
//!
//! # Structure
//!
//! ```text
//! SA Payload
//!   └── Proposal(s)
//!         └── Transform(s)
//!               └── Attribute(s) (e.g. key length)
//! ```

use crate::ike::{Error, Result};

/// Transform Type (RFC 7296 Section 3.3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransformType {
    /// Encryption Algorithm (ENCR)
    Encr = 1,
    /// Pseudo-random Function (PRF)
    Prf = 2,
    /// Integrity Algorithm (INTEG)
    Integ = 3,
    /// Diffie-Hellman Group (D-H)
    Dh = 4,
    /// Extended Sequence Numbers (ESN)
    Esn = 5,
}

impl TransformType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(TransformType::Encr),
            2 => Some(TransformType::Prf),
            3 => Some(TransformType::Integ),
            4 => Some(TransformType::Dh),
            5 => Some(TransformType::Esn),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Transform ID for Encryption (ENCR) algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EncrTransformId {
    /// AES-CBC (key length from attribute)
    AesCbc = 12,
    /// AES-GCM with 16-byte ICV (key length from attribute)
    AesGcm16 = 20,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305 = 28,
}

impl EncrTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            12 => Some(EncrTransformId::AesCbc),
            20 => Some(EncrTransformId::AesGcm16),
            28 => Some(EncrTransformId::ChaCha20Poly1305),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Check if this is a combined-mode (AEAD) cipher
    pub fn is_aead(self) -> bool {
        matches!(
            self,
            EncrTransformId::AesGcm16 | EncrTransformId::ChaCha20Poly1305
        )
    }
}

/// Transform ID for PRF algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PrfTransformId {
    /// HMAC-SHA1
    HmacSha1 = 2,
    /// HMAC-SHA2-256
    HmacSha256 = 5,
    /// HMAC-SHA2-384
    HmacSha384 = 6,
    /// HMAC-SHA2-512
    HmacSha512 = 7,
}

impl PrfTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            2 => Some(PrfTransformId::HmacSha1),
            5 => Some(PrfTransformId::HmacSha256),
            6 => Some(PrfTransformId::HmacSha384),
            7 => Some(PrfTransformId::HmacSha512),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Transform ID for Integrity algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum IntegTransformId {
    /// NONE (only valid with combined-mode ciphers)
    None = 0,
    /// HMAC-SHA1-96
    HmacSha1_96 = 2,
    /// HMAC-SHA2-256-128 (128-bit ICV)
    HmacSha256_128 = 12,
    /// HMAC-SHA2-384-192 (192-bit ICV)
    HmacSha384_192 = 13,
    /// HMAC-SHA2-512-256 (256-bit ICV)
    HmacSha512_256 = 14,
}

impl IntegTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(IntegTransformId::None),
            2 => Some(IntegTransformId::HmacSha1_96),
            12 => Some(IntegTransformId::HmacSha256_128),
            13 => Some(IntegTransformId::HmacSha384_192),
            14 => Some(IntegTransformId::HmacSha512_256),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Transform ID for Diffie-Hellman groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DhTransformId {
    /// 2048-bit MODP Group
    Group14 = 14,
    /// 3072-bit MODP Group
    Group15 = 15,
    /// 4096-bit MODP Group
    Group16 = 16,
    /// Curve25519
    Group31 = 31,
}

impl DhTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            14 => Some(DhTransformId::Group14),
            15 => Some(DhTransformId::Group15),
            16 => Some(DhTransformId::Group16),
            31 => Some(DhTransformId::Group31),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// ESN transform IDs (RFC 7296 Section 3.3.2)
pub const ESN_NONE: u16 = 0;
/// Extended sequence numbers enabled
pub const ESN_EXTENDED: u16 = 1;

/// Key Length attribute type (RFC 7296 Section 3.3.5), TV format
pub const ATTR_KEY_LENGTH: u16 = 14;

/// High bit marking the short (TV) attribute format
const ATTR_FORMAT_TV: u16 = 0x8000;

/// Transform attribute (e.g., key length)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformAttribute {
    /// Attribute type (without the format bit)
    pub attr_type: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

/// IKE Transform
///
/// Represents a single cryptographic algorithm choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    /// Transform type
    pub transform_type: TransformType,

    /// Transform ID
    pub transform_id: u16,

    /// Attributes (e.g., key length)
    pub attributes: Vec<TransformAttribute>,
}

impl Transform {
    /// Create new transform
    pub fn new(transform_type: TransformType, transform_id: u16) -> Self {
        Transform {
            transform_type,
            transform_id,
            attributes: Vec::new(),
        }
    }

    /// Create encryption transform without a key-length attribute
    pub fn encr(id: EncrTransformId) -> Self {
        Transform::new(TransformType::Encr, id.to_u16())
    }

    /// Create encryption transform carrying a key-length attribute
    pub fn encr_with_key_len(id: EncrTransformId, key_len_bits: u16) -> Self {
        Transform::new(TransformType::Encr, id.to_u16()).with_attribute(
            ATTR_KEY_LENGTH,
            key_len_bits.to_be_bytes().to_vec(),
        )
    }

    /// Create PRF transform
    pub fn prf(id: PrfTransformId) -> Self {
        Transform::new(TransformType::Prf, id.to_u16())
    }

    /// Create integrity transform
    pub fn integ(id: IntegTransformId) -> Self {
        Transform::new(TransformType::Integ, id.to_u16())
    }

    /// Create DH group transform
    pub fn dh(id: DhTransformId) -> Self {
        Transform::new(TransformType::Dh, id.to_u16())
    }

    /// Create ESN transform
    pub fn esn(id: u16) -> Self {
        Transform::new(TransformType::Esn, id)
    }

    /// Add attribute
    pub fn with_attribute(mut self, attr_type: u16, value: Vec<u8>) -> Self {
        self.attributes.push(TransformAttribute { attr_type, value });
        self
    }

    /// Get negotiated key length in bits, if a key-length attribute is present
    pub fn key_length_bits(&self) -> Option<u16> {
        self.attributes
            .iter()
            .find(|a| a.attr_type == ATTR_KEY_LENGTH)
            .and_then(|a| {
                if a.value.len() == 2 {
                    Some(u16::from_be_bytes([a.value[0], a.value[1]]))
                } else {
                    None
                }
            })
    }

    /// Check if this transform is compatible with another
    ///
    /// Type, ID and key-length attribute must all match.
    pub fn is_compatible_with(&self, other: &Transform) -> bool {
        self.transform_type == other.transform_type
            && self.transform_id == other.transform_id
            && self.key_length_bits() == other.key_length_bits()
    }
}

/// Protocol ID for proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolId {
    /// IKE SA
    Ike = 1,
    /// AH (Authentication Header) - not commonly used
    Ah = 2,
    /// ESP (Encapsulating Security Payload)
    Esp = 3,
}

impl ProtocolId {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ProtocolId::Ike),
            2 => Some(ProtocolId::Ah),
            3 => Some(ProtocolId::Esp),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// IKE Proposal
///
/// Represents a single proposal containing one or more transforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Proposal number (1-based)
    pub proposal_num: u8,

    /// Protocol ID (IKE, ESP, AH)
    pub protocol_id: ProtocolId,

    /// SPI (Security Parameter Index) - empty for initial IKE proposals
    pub spi: Vec<u8>,

    /// List of transforms
    pub transforms: Vec<Transform>,
}

impl Proposal {
    /// Create new proposal
    pub fn new(proposal_num: u8, protocol_id: ProtocolId) -> Self {
        Proposal {
            proposal_num,
            protocol_id,
            spi: Vec::new(),
            transforms: Vec::new(),
        }
    }

    /// Add transform to proposal
    pub fn add_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Set SPI
    pub fn with_spi(mut self, spi: Vec<u8>) -> Self {
        self.spi = spi;
        self
    }

    /// Get transform by type
    pub fn get_transform(&self, transform_type: TransformType) -> Option<&Transform> {
        self.transforms
            .iter()
            .find(|t| t.transform_type == transform_type)
    }

    fn has_transform(&self, transform_type: TransformType) -> bool {
        self.get_transform(transform_type).is_some()
    }

    /// Check whether the encryption transform is a combined-mode cipher
    pub fn is_aead(&self) -> bool {
        self.get_transform(TransformType::Encr)
            .and_then(|t| EncrTransformId::from_u16(t.transform_id))
            .map(|id| id.is_aead())
            .unwrap_or(false)
    }

    /// Combined-mode ciphers forbid any non-NONE integrity transform in the
    /// same proposal.
    fn validate_combined_mode(&self) -> Result<()> {
        if !self.is_aead() {
            return Ok(());
        }
        let has_real_integ = self.transforms.iter().any(|t| {
            t.transform_type == TransformType::Integ
                && t.transform_id != IntegTransformId::None.to_u16()
        });
        if has_real_integ {
            return Err(Error::InvalidParameter(
                "Combined-mode cipher cannot carry an integrity transform".into(),
            ));
        }
        Ok(())
    }

    /// Validate this proposal as an IKE SA proposal.
    ///
    /// IKE proposals must carry at least one ENCR, PRF and D-H transform,
    /// must not carry ESN, and an integrity transform unless the cipher is
    /// combined-mode.
    pub fn validate_ike(&self) -> Result<()> {
        if self.protocol_id != ProtocolId::Ike {
            return Err(Error::InvalidParameter(
                "IKE proposal must use protocol ID IKE".into(),
            ));
        }
        for (ty, name) in [
            (TransformType::Encr, "ENCR"),
            (TransformType::Prf, "PRF"),
            (TransformType::Dh, "D-H"),
        ] {
            if !self.has_transform(ty) {
                return Err(Error::InvalidParameter(format!(
                    "IKE proposal is missing a {} transform",
                    name
                )));
            }
        }
        if !self.is_aead() && !self.has_transform(TransformType::Integ) {
            return Err(Error::InvalidParameter(
                "IKE proposal with a classic cipher needs an integrity transform".into(),
            ));
        }
        if self.has_transform(TransformType::Esn) {
            return Err(Error::InvalidParameter(
                "IKE proposal must not carry an ESN transform".into(),
            ));
        }
        self.validate_combined_mode()
    }

    /// Validate this proposal as a child (ESP) SA proposal.
    ///
    /// Child proposals must carry ENCR and ESN transforms.
    pub fn validate_child(&self) -> Result<()> {
        if self.protocol_id != ProtocolId::Esp {
            return Err(Error::InvalidParameter(
                "Child proposal must use protocol ID ESP".into(),
            ));
        }
        if !self.has_transform(TransformType::Encr) {
            return Err(Error::InvalidParameter(
                "Child proposal is missing an ENCR transform".into(),
            ));
        }
        if !self.has_transform(TransformType::Esn) {
            return Err(Error::InvalidParameter(
                "Child proposal must carry an ESN transform".into(),
            ));
        }
        self.validate_combined_mode()
    }

    /// Check if proposal is acceptable given a list of configured proposals
    ///
    /// Returns true if all transforms in this proposal match at least one
    /// configured proposal of the same protocol.
    pub fn is_acceptable(&self, configured: &[Proposal]) -> bool {
        for config in configured {
            if config.protocol_id != self.protocol_id {
                continue;
            }

            let all_match = self.transforms.iter().all(|our_transform| {
                config
                    .transforms
                    .iter()
                    .any(|config_transform| our_transform.is_compatible_with(config_transform))
            });

            if all_match {
                return true;
            }
        }

        false
    }
}

/// Select first acceptable proposal from a list
///
/// This implements the proposal selection algorithm from RFC 7296 Section 2.7.
pub fn select_proposal<'a>(
    offered: &'a [Proposal],
    configured: &[Proposal],
) -> Result<&'a Proposal> {
    for proposal in offered {
        if proposal.is_acceptable(configured) {
            return Ok(proposal);
        }
    }

    Err(Error::NoProposalChosen)
}

// Substructure codec (RFC 7296 Section 3.3.1)

const LAST_SUBSTRUCTURE: u8 = 0;
const MORE_PROPOSALS: u8 = 2;
const MORE_TRANSFORMS: u8 = 3;

/// Encode a proposal list into SA payload data (without the generic header).
pub fn encode_proposals(proposals: &[Proposal]) -> Vec<u8> {
    let mut data = Vec::new();

    for (i, proposal) in proposals.iter().enumerate() {
        let last = i + 1 == proposals.len();
        let mut body = Vec::new();

        body.push(proposal.proposal_num);
        body.push(proposal.protocol_id.to_u8());
        body.push(proposal.spi.len() as u8);
        body.push(proposal.transforms.len() as u8);
        body.extend_from_slice(&proposal.spi);

        for (j, transform) in proposal.transforms.iter().enumerate() {
            let t_last = j + 1 == proposal.transforms.len();
            let mut t_body = Vec::new();
            t_body.push(transform.transform_type.to_u8());
            t_body.push(0); // reserved
            t_body.extend_from_slice(&transform.transform_id.to_be_bytes());
            for attr in &transform.attributes {
                // Key length is the only attribute we emit; it uses TV form
                t_body.extend_from_slice(&(attr.attr_type | ATTR_FORMAT_TV).to_be_bytes());
                t_body.extend_from_slice(&attr.value);
            }

            body.push(if t_last { LAST_SUBSTRUCTURE } else { MORE_TRANSFORMS });
            body.push(0); // reserved
            body.extend_from_slice(&((4 + t_body.len()) as u16).to_be_bytes());
            body.extend_from_slice(&t_body);
        }

        data.push(if last { LAST_SUBSTRUCTURE } else { MORE_PROPOSALS });
        data.push(0); // reserved
        data.extend_from_slice(&((4 + body.len()) as u16).to_be_bytes());
        data.extend_from_slice(&body);
    }

    data
}

/// Decode SA payload data (without the generic header) into proposals.
pub fn decode_proposals(data: &[u8]) -> Result<Vec<Proposal>> {
    let mut proposals = Vec::new();
    let mut offset = 0;

    loop {
        if data.len() < offset + 8 {
            return Err(Error::InvalidSyntax("Truncated proposal substructure".into()));
        }

        let more = data[offset];
        let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        if length < 8 || offset + length > data.len() {
            return Err(Error::InvalidSyntax("Bad proposal length".into()));
        }

        let proposal_num = data[offset + 4];
        let protocol_id = ProtocolId::from_u8(data[offset + 5])
            .ok_or_else(|| Error::InvalidSyntax("Unknown protocol ID in proposal".into()))?;
        let spi_size = data[offset + 6] as usize;
        let num_transforms = data[offset + 7] as usize;

        if length < 8 + spi_size {
            return Err(Error::InvalidSyntax("Proposal SPI overruns substructure".into()));
        }
        let spi = data[offset + 8..offset + 8 + spi_size].to_vec();

        let mut transforms = Vec::with_capacity(num_transforms);
        let mut t_offset = offset + 8 + spi_size;
        let proposal_end = offset + length;

        for _ in 0..num_transforms {
            if proposal_end < t_offset + 8 {
                return Err(Error::InvalidSyntax("Truncated transform substructure".into()));
            }
            let t_length =
                u16::from_be_bytes([data[t_offset + 2], data[t_offset + 3]]) as usize;
            if t_length < 8 || t_offset + t_length > proposal_end {
                return Err(Error::InvalidSyntax("Bad transform length".into()));
            }

            let transform_type = TransformType::from_u8(data[t_offset + 4])
                .ok_or_else(|| Error::InvalidSyntax("Unknown transform type".into()))?;
            let transform_id =
                u16::from_be_bytes([data[t_offset + 6], data[t_offset + 7]]);

            let mut attributes = Vec::new();
            let mut a_offset = t_offset + 8;
            let t_end = t_offset + t_length;
            while a_offset < t_end {
                if t_end < a_offset + 4 {
                    return Err(Error::InvalidSyntax("Truncated transform attribute".into()));
                }
                let raw_type = u16::from_be_bytes([data[a_offset], data[a_offset + 1]]);
                if raw_type & ATTR_FORMAT_TV != 0 {
                    // TV form: two-byte value follows directly
                    attributes.push(TransformAttribute {
                        attr_type: raw_type & !ATTR_FORMAT_TV,
                        value: data[a_offset + 2..a_offset + 4].to_vec(),
                    });
                    a_offset += 4;
                } else {
                    let a_len =
                        u16::from_be_bytes([data[a_offset + 2], data[a_offset + 3]]) as usize;
                    if t_end < a_offset + 4 + a_len {
                        return Err(Error::InvalidSyntax(
                            "Transform attribute overruns transform".into(),
                        ));
                    }
                    attributes.push(TransformAttribute {
                        attr_type: raw_type,
                        value: data[a_offset + 4..a_offset + 4 + a_len].to_vec(),
                    });
                    a_offset += 4 + a_len;
                }
            }

            transforms.push(Transform {
                transform_type,
                transform_id,
                attributes,
            });
            t_offset = t_end;
        }

        if t_offset != proposal_end {
            return Err(Error::InvalidSyntax(
                "Transform count does not match proposal length".into(),
            ));
        }

        proposals.push(Proposal {
            proposal_num,
            protocol_id,
            spi,
            transforms,
        });

        offset = proposal_end;
        match more {
            LAST_SUBSTRUCTURE => break,
            MORE_PROPOSALS => continue,
            _ => return Err(Error::InvalidSyntax("Bad proposal continuation flag".into())),
        }
    }

    if offset != data.len() {
        return Err(Error::InvalidSyntax("Trailing bytes after last proposal".into()));
    }

    Ok(proposals)
}
